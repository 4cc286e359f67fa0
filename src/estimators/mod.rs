//! Koopman operator estimators.
//!
//! All estimators implement [`KoopmanEstimator`] and share the low-rank
//! representation of [`spectral::ReducedOperator`]:
//!
//! - [`KernelDmd`]: kernel (dual) reduced-rank or principal-component
//!   regression, with a full or randomized solver
//! - [`NystroemKernelDmd`]: primal regression on Nystroem features
//! - [`ExtendedDmd`]: primal regression on an arbitrary [`FeatureMap`]
//!
//! Every estimator round-trips through JSON (`crate::io::model`).

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::data::ContextBatch;
use crate::error::AppError;
use crate::math::C64;

pub mod dual;
pub mod edmd;
pub mod nystroem;
pub mod primal;
pub mod spectral;

pub use dual::KernelDmd;
pub use edmd::{ExtendedDmd, FeatureMap, IdentityFeatures};
pub use nystroem::NystroemKernelDmd;
pub use spectral::{ReducedOperator, Spectrum};

/// Which regression problem a low-rank estimator solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regression {
    /// Reduced-rank regression.
    #[default]
    ReducedRank,
    /// Principal-component regression.
    PrincipalComponent,
}

/// Solver for the dual eigenproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "solver", rename_all = "kebab-case")]
pub enum SvdSolver {
    /// Dense eigendecomposition of the `n × n` kernel matrices.
    #[default]
    Full,
    /// Randomized range finder with power iterations.
    Randomized {
        iterated_power: usize,
        n_oversamples: usize,
    },
}

/// Eigenvalues and, optionally, left and right eigenfunctions evaluated on
/// the inputs of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Eigen {
    pub values: Vec<C64>,
    pub left: Option<DMatrix<C64>>,
    pub right: Option<DMatrix<C64>>,
}

pub trait KoopmanEstimator {
    fn name(&self) -> &str;

    fn fit(&mut self, batch: &ContextBatch) -> Result<(), AppError>;

    /// The fitted reduced operator.
    fn operator(&self) -> Result<&ReducedOperator, AppError>;

    /// Embedding `a(x)` of flattened inputs, one row per window.
    fn embed(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError>;

    /// Output-side embedding `b(x)`: left eigenfunctions are `b(x) L`.
    fn embed_left(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError>;

    /// Readout of an observable given its values on the training outputs,
    /// one row per training window. The readout of the outputs themselves
    /// is the operator's own.
    fn readout_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError>;

    /// Training risk (`None`) or held-out risk on a batch.
    fn risk(&self, batch: Option<&ContextBatch>) -> Result<f64, AppError>;

    fn is_fitted(&self) -> bool {
        self.operator().is_ok()
    }

    /// One-step prediction of the batch outputs.
    fn predict(&self, batch: &ContextBatch) -> Result<DMatrix<f64>, AppError> {
        self.predict_steps(batch, 1)
    }

    fn predict_steps(&self, batch: &ContextBatch, steps: usize) -> Result<DMatrix<f64>, AppError> {
        let op = self.operator()?;
        let a = self.embed(batch.inputs())?;
        op.propagate(&a, steps)
    }

    /// Eigenvalues sorted by decreasing modulus.
    fn eigvals(&self) -> Result<Vec<C64>, AppError> {
        Ok(self.operator()?.spectrum().eigenvalues.clone())
    }

    fn eig(
        &self,
        eval_left_on: Option<&ContextBatch>,
        eval_right_on: Option<&ContextBatch>,
    ) -> Result<Eigen, AppError> {
        let op = self.operator()?;
        let left = match eval_left_on {
            Some(batch) => Some(op.left_eigenfunctions(&self.embed_left(batch.inputs())?)?),
            None => None,
        };
        let right = match eval_right_on {
            Some(batch) => Some(op.eigenfunctions(&self.embed(batch.inputs())?)?),
            None => None,
        };
        Ok(Eigen {
            values: op.spectrum().eigenvalues.clone(),
            left,
            right,
        })
    }

    /// Koopman modes of the output observable, one row per eigenvalue.
    fn modes(&self) -> Result<DMatrix<C64>, AppError> {
        Ok(self.operator()?.spectrum().modes.clone())
    }

    /// Koopman modes of any observable, given its values on the training
    /// outputs (one row per training window).
    fn modes_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<C64>, AppError> {
        let op = self.operator()?;
        op.modes_of(&self.readout_of(values)?)
    }

    /// Spectral forecast `t` steps ahead.
    fn forecast(&self, batch: &ContextBatch, steps: usize) -> Result<DMatrix<f64>, AppError> {
        let op = self.operator()?;
        let a = self.embed(batch.inputs())?;
        op.forecast(&a, steps)
    }

    /// How well the right eigenfunctions evolve by their eigenvalues on a batch.
    fn spectral_error(&self, batch: &ContextBatch) -> Result<f64, AppError> {
        let op = self.operator()?;
        let ax = self.embed(batch.inputs())?;
        let ay = self.embed(batch.outputs())?;
        op.spectral_error(&ax, &ay)
    }

    /// The same check for the left eigenfunctions: `ξ(X) ≈ ξ(Y) Λ`.
    fn left_spectral_error(&self, batch: &ContextBatch) -> Result<f64, AppError> {
        let op = self.operator()?;
        let bx = self.embed_left(batch.inputs())?;
        let by = self.embed_left(batch.outputs())?;
        op.left_spectral_error(&bx, &by)
    }
}

pub(crate) fn check_observable_rows(name: &str, n_train: usize, values: &DMatrix<f64>) -> Result<(), AppError> {
    if values.nrows() != n_train {
        return Err(AppError::input(format!(
            "{name}: observable has {} rows, the estimator was fitted on {n_train} windows.",
            values.nrows()
        )));
    }
    Ok(())
}

pub(crate) fn validate_low_rank(name: &str, rank: usize, tikhonov_reg: f64, n: usize) -> Result<(), AppError> {
    if rank == 0 {
        return Err(AppError::input(format!("{name}: rank must be >= 1.")));
    }
    if !(tikhonov_reg.is_finite() && tikhonov_reg >= 0.0) {
        return Err(AppError::input(format!(
            "{name}: Tikhonov regularization must be finite and >= 0, got {tikhonov_reg}."
        )));
    }
    if n < 2 {
        return Err(AppError::data(format!("{name}: need at least 2 training windows, got {n}.")));
    }
    if rank > n {
        return Err(AppError::data(format!(
            "{name}: rank {rank} exceeds the number of training windows {n}."
        )));
    }
    Ok(())
}

pub(crate) fn check_input_width(name: &str, expected: usize, inputs: &DMatrix<f64>) -> Result<(), AppError> {
    if inputs.ncols() != expected {
        return Err(AppError::input(format!(
            "{name}: inputs have {} columns, the estimator was fitted on {expected}.",
            inputs.ncols()
        )));
    }
    Ok(())
}
