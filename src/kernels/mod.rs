//! Positive-definite kernels and their Gram matrices.
//!
//! Gram matrices are filled row-parallel with `rayon`. Each entry depends only
//! on its two rows, so the result does not depend on the thread count.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Kernel {
    /// `exp(-|x - y|² / (2 ℓ²))`
    Rbf { length_scale: f64 },
    /// `x · y`
    Linear,
    /// `(x · y + coef0)^degree`
    Polynomial { degree: u32, coef0: f64 },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Rbf { length_scale: 1.0 }
    }
}

impl Kernel {
    pub fn validate(&self) -> Result<(), AppError> {
        match *self {
            Kernel::Rbf { length_scale } if !(length_scale.is_finite() && length_scale > 0.0) => {
                Err(AppError::input(format!(
                    "RBF length scale must be finite and > 0, got {length_scale}."
                )))
            }
            Kernel::Polynomial { degree: 0, .. } => {
                Err(AppError::input("Polynomial kernel degree must be >= 1."))
            }
            Kernel::Polynomial { coef0, .. } if !coef0.is_finite() => {
                Err(AppError::input("Polynomial kernel offset must be finite."))
            }
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> String {
        match *self {
            Kernel::Rbf { length_scale } => format!("RBF(ℓ={length_scale})"),
            Kernel::Linear => "Linear".to_string(),
            Kernel::Polynomial { degree, coef0 } => format!("Poly(d={degree}, c={coef0})"),
        }
    }

    pub fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        match *self {
            Kernel::Rbf { length_scale } => {
                let sq: f64 = x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum();
                (-sq / (2.0 * length_scale * length_scale)).exp()
            }
            Kernel::Linear => dot(x, y),
            Kernel::Polynomial { degree, coef0 } => (dot(x, y) + coef0).powi(degree as i32),
        }
    }

    /// `K[i, j] = k(a_i, b_j)` for the rows of `a` and `b`.
    pub fn gram(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        if a.ncols() != b.ncols() {
            return Err(AppError::input(format!(
                "Kernel inputs have different dimensions: {} vs {}.",
                a.ncols(),
                b.ncols()
            )));
        }
        let rows_a = row_vectors(a);
        let rows_b = row_vectors(b);
        let nb = rows_b.len();

        let values: Vec<f64> = rows_a
            .par_iter()
            .flat_map_iter(|xa| rows_b.iter().map(move |xb| self.eval(xa, xb)))
            .collect();

        Ok(DMatrix::from_row_slice(rows_a.len(), nb, &values))
    }

    /// `k(a, b) m` without materializing the Gram matrix.
    pub fn gram_apply(
        &self,
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        m: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, AppError> {
        if a.ncols() != b.ncols() || m.nrows() != b.nrows() {
            return Err(AppError::input(format!(
                "Incompatible shapes for k(a, b) m: a {:?}, b {:?}, m {:?}.",
                a.shape(),
                b.shape(),
                m.shape()
            )));
        }
        let rows_a = row_vectors(a);
        let rows_b = row_vectors(b);
        let r = m.ncols();

        let values: Vec<f64> = rows_a
            .par_iter()
            .flat_map_iter(|xa| {
                let krow: Vec<f64> = rows_b.iter().map(|xb| self.eval(xa, xb)).collect();
                (0..r).map(move |j| krow.iter().enumerate().map(|(i, k)| k * m[(i, j)]).sum::<f64>())
            })
            .collect();

        Ok(DMatrix::from_row_slice(rows_a.len(), r, &values))
    }

    /// Symmetric Gram matrix of `a` with itself.
    pub fn gram_sym(&self, a: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.gram(a, a)
    }

    /// `k(a_i, a_i)` for every row.
    pub fn diag(&self, a: &DMatrix<f64>) -> DVector<f64> {
        let rows = row_vectors(a);
        DVector::from_iterator(rows.len(), rows.iter().map(|x| self.eval(x, x)))
    }
}

fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

fn row_vectors(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|r| r.iter().copied().collect()).collect()
}
