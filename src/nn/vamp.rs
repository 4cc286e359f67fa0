//! VAMP-2 score and its gradient.
//!
//! For mean-centred features `X` (time `t`) and `Y` (time `t + 1`), `n` rows:
//!
//! ```text
//! C00 = XᵀX/n + εI    C11 = YᵀY/n + εI    C01 = XᵀY/n
//! S   = ‖C00^{-1/2} C01 C11^{-1/2}‖²_F = tr(C00⁻¹ C01 C11⁻¹ C01ᵀ)
//! ```
//!
//! With `P = C00⁻¹ C01 C11⁻¹`, the gradients w.r.t. the centred features are
//! `∂S/∂X = 2 (Y Pᵀ − X P C01ᵀ C00⁻¹) / n` and
//! `∂S/∂Y = 2 (X P − Y Pᵀ C01 C11⁻¹) / n`; centring projects out the column means.

use nalgebra::DMatrix;

use crate::error::AppError;
use crate::math::{center_columns, cholesky_factor, column_means};

#[derive(Debug, Clone)]
pub struct VampGradient {
    pub score: f64,
    pub grad_x: DMatrix<f64>,
    pub grad_y: DMatrix<f64>,
}

struct Covariances {
    x: DMatrix<f64>,
    y: DMatrix<f64>,
    c00_inv: DMatrix<f64>,
    c11_inv: DMatrix<f64>,
    c01: DMatrix<f64>,
}

fn covariances(fx: &DMatrix<f64>, fy: &DMatrix<f64>, epsilon: f64) -> Result<Covariances, AppError> {
    if fx.shape() != fy.shape() {
        return Err(AppError::numeric(format!(
            "VAMP features disagree: {:?} vs {:?}.",
            fx.shape(),
            fy.shape()
        )));
    }
    let n = fx.nrows();
    if n < 2 {
        return Err(AppError::data(format!("The VAMP score needs at least 2 samples, got {n}.")));
    }
    if !(fx.iter().all(|v| v.is_finite()) && fy.iter().all(|v| v.is_finite())) {
        return Err(AppError::numeric("Non-finite features in the VAMP score."));
    }

    let n_f = n as f64;
    let d = fx.ncols();
    let x = center_columns(fx, &column_means(fx));
    let y = center_columns(fy, &column_means(fy));
    let reg = DMatrix::<f64>::identity(d, d) * epsilon;

    let c00 = x.transpose() * &x / n_f + &reg;
    let c11 = y.transpose() * &y / n_f + &reg;
    let c01 = x.transpose() * &y / n_f;

    Ok(Covariances {
        c00_inv: cholesky_factor(&c00)?.inverse(),
        c11_inv: cholesky_factor(&c11)?.inverse(),
        c01,
        x,
        y,
    })
}

pub fn vamp2_score(fx: &DMatrix<f64>, fy: &DMatrix<f64>, epsilon: f64) -> Result<f64, AppError> {
    let c = covariances(fx, fy, epsilon)?;
    let p = &c.c00_inv * &c.c01 * &c.c11_inv;
    Ok(p.component_mul(&c.c01).sum())
}

pub fn vamp2_with_grad(fx: &DMatrix<f64>, fy: &DMatrix<f64>, epsilon: f64) -> Result<VampGradient, AppError> {
    let c = covariances(fx, fy, epsilon)?;
    let n_f = fx.nrows() as f64;

    let p = &c.c00_inv * &c.c01 * &c.c11_inv;
    let score = p.component_mul(&c.c01).sum();
    let g00 = &p * c.c01.transpose() * &c.c00_inv;
    let g11 = p.transpose() * &c.c01 * &c.c11_inv;

    let grad_xc = (&c.y * p.transpose() - &c.x * g00) * (2.0 / n_f);
    let grad_yc = (&c.x * &p - &c.y * g11) * (2.0 / n_f);

    Ok(VampGradient {
        score,
        grad_x: center_columns(&grad_xc, &column_means(&grad_xc)),
        grad_y: center_columns(&grad_yc, &column_means(&grad_yc)),
    })
}
