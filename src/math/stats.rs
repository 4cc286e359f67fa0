//! Error statistics and column-wise moments.

use nalgebra::{DMatrix, RowDVector};

use crate::error::AppError;

/// Root-mean-square error over every entry of two equally shaped matrices.
pub fn rmse(pred: &DMatrix<f64>, target: &DMatrix<f64>) -> Result<f64, AppError> {
    if pred.shape() != target.shape() {
        return Err(AppError::numeric(format!(
            "Shape mismatch in rMSE: prediction {:?} vs target {:?}.",
            pred.shape(),
            target.shape()
        )));
    }
    if pred.is_empty() {
        return Err(AppError::data("Cannot compute rMSE on an empty prediction."));
    }
    let mse = (pred - target).norm_squared() / pred.len() as f64;
    let out = mse.sqrt();
    if !out.is_finite() {
        return Err(AppError::numeric("Non-finite rMSE."));
    }
    Ok(out)
}

/// Mean of each column.
pub fn column_means(m: &DMatrix<f64>) -> RowDVector<f64> {
    if m.nrows() == 0 {
        return RowDVector::zeros(m.ncols());
    }
    m.row_sum() / m.nrows() as f64
}

/// Subtract `means` from every row.
pub fn center_columns(m: &DMatrix<f64>, means: &RowDVector<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for mut row in out.row_iter_mut() {
        row -= means;
    }
    out
}
