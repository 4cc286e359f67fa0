//! Koopman regression on explicit features (primal formulation).
//!
//! With feature matrices `Φ_X`, `Φ_Y` (`n × m`), covariances
//! `C_X = Φ_Xᵀ Φ_X / n` and `C_XY = Φ_Xᵀ Φ_Y / n`:
//!
//! - reduced rank: top eigenvectors of `C_XY C_XYᵀ u = σ² (C_X + γI) u`,
//!   normalized so that `Uᵀ (C_X + γI) U = I`
//! - principal components: `U = E_r (Λ_r + γ)^{-1/2}` from the eigenpairs of `C_X`
//!
//! The operator is `G = U Uᵀ C_XY`; embedding `Φ(x) U`, transfer
//! `Uᵀ C_XY U`, readout `Uᵀ Φ_Xᵀ Y / n`. A left eigenvector `q` of the
//! transfer matrix gives the left eigenvector `C_YX U q` of `G`, hence the
//! output-side embedding `Φ(x) C_YX U`.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::estimators::{ReducedOperator, Regression};
use crate::logging::NUMERICS_TARGET;
use crate::math::{ensure_finite, generalized_symmetric_eigen, sorted_symmetric_eigen};

const EIG_REL_TOL: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PrimalFit {
    pub u: DMatrix<f64>,
    /// `C_YX U`
    pub left_map: DMatrix<f64>,
    /// `Φ_X U` on the training inputs, for readouts of other observables.
    pub train_embedding: DMatrix<f64>,
    /// `G = U Uᵀ C_XY`, used for the feature-space risk.
    pub risk_map: DMatrix<f64>,
    pub train_risk: f64,
    pub operator: ReducedOperator,
}

impl PrimalFit {
    pub fn fit(
        phi_x: &DMatrix<f64>,
        phi_y: &DMatrix<f64>,
        observable: &DMatrix<f64>,
        rank: usize,
        tikhonov_reg: f64,
        regression: Regression,
    ) -> Result<Self, AppError> {
        let n = phi_x.nrows();
        if phi_y.shape() != phi_x.shape() || observable.nrows() != n {
            return Err(AppError::numeric(format!(
                "Feature shapes disagree: Φ_X {:?}, Φ_Y {:?}, observable {:?}.",
                phi_x.shape(),
                phi_y.shape(),
                observable.shape()
            )));
        }
        ensure_finite(phi_x, "Input features")?;
        ensure_finite(phi_y, "Output features")?;

        let n_f = n as f64;
        let m = phi_x.ncols();
        let cov_x = phi_x.transpose() * phi_x / n_f;
        let cov_xy = phi_x.transpose() * phi_y / n_f;

        let r = rank.min(m);
        if r < rank {
            tracing::warn!(target: NUMERICS_TARGET, requested = rank, available = m, "rank exceeds feature dimension; reducing");
        }

        let u = match regression {
            Regression::ReducedRank => {
                let lhs = &cov_xy * cov_xy.transpose();
                let rhs = &cov_x + DMatrix::<f64>::identity(m, m) * tikhonov_reg;
                generalized_symmetric_eigen(&lhs, &rhs, r)?.1
            }
            Regression::PrincipalComponent => {
                let (values, vectors) = sorted_symmetric_eigen(&cov_x)?;
                let max = values.iter().copied().fold(0.0_f64, f64::max);
                let keep = values.iter().take_while(|&&v| v > EIG_REL_TOL * max).count();
                if keep == 0 {
                    return Err(AppError::numeric("Feature covariance is numerically zero."));
                }
                if keep < r {
                    tracing::warn!(target: NUMERICS_TARGET, requested = r, available = keep, "rank too high; reducing");
                }
                let r = r.min(keep);
                let mut u = vectors.columns(0, r).into_owned();
                for (j, mut col) in u.column_iter_mut().enumerate() {
                    col /= (values[j] + tikhonov_reg).sqrt();
                }
                u
            }
        };

        let transfer = u.transpose() * &cov_xy * &u;
        let train_embedding = phi_x * &u;
        let readout = train_embedding.transpose() * observable / n_f;
        let left_map = cov_xy.transpose() * &u;
        let risk_map = &u * u.transpose() * &cov_xy;
        let train_risk = feature_risk(phi_x, phi_y, &risk_map)?;

        Ok(Self {
            operator: ReducedOperator::new(transfer, readout)?,
            u,
            left_map,
            train_embedding,
            risk_map,
            train_risk,
        })
    }

    pub fn embed(&self, phi: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        if phi.ncols() != self.u.nrows() {
            return Err(AppError::input(format!(
                "Features have {} columns, expected {}.",
                phi.ncols(),
                self.u.nrows()
            )));
        }
        Ok(phi * &self.u)
    }

    pub fn embed_left(&self, phi: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        if phi.ncols() != self.left_map.nrows() {
            return Err(AppError::input(format!(
                "Features have {} columns, expected {}.",
                phi.ncols(),
                self.left_map.nrows()
            )));
        }
        Ok(phi * &self.left_map)
    }

    /// `(Φ_X U)ᵀ F / n` for observable values `F` on the training outputs.
    pub fn readout_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let n = self.train_embedding.nrows();
        if values.nrows() != n {
            return Err(AppError::input(format!(
                "Observable has {} rows, the estimator was fitted on {n} windows.",
                values.nrows()
            )));
        }
        Ok(self.train_embedding.transpose() * values / n as f64)
    }

    pub fn risk(&self, phi_x: &DMatrix<f64>, phi_y: &DMatrix<f64>) -> Result<f64, AppError> {
        if phi_x.ncols() != self.risk_map.nrows() || phi_y.shape() != phi_x.shape() {
            return Err(AppError::input("Feature shapes do not match the fitted estimator."));
        }
        feature_risk(phi_x, phi_y, &self.risk_map)
    }
}

/// `mean ‖Φ_Y − Φ_X G‖²` over rows.
fn feature_risk(phi_x: &DMatrix<f64>, phi_y: &DMatrix<f64>, g: &DMatrix<f64>) -> Result<f64, AppError> {
    if phi_x.nrows() == 0 {
        return Err(AppError::data("Cannot evaluate the risk on an empty batch."));
    }
    let risk = (phi_y - phi_x * g).norm_squared() / phi_x.nrows() as f64;
    if !risk.is_finite() {
        return Err(AppError::numeric("Non-finite risk."));
    }
    Ok(risk)
}
