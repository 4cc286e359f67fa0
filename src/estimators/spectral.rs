//! The reduced representation shared by every low-rank estimator.
//!
//! A fitted estimator maps a batch of inputs to an embedding `a(x)` with `r`
//! columns. The operator then acts on that embedding:
//!
//! - one step ahead: `a(x) B`
//! - `t` steps ahead: `a(x) W^{t-1} B`
//! - eigenvalues: the spectrum of `W`
//! - right eigenfunctions: `a(x) P` where `W P = P Λ`
//! - left eigenfunctions: `b(x) L` where `Lᵀ = P⁻¹`, so `Lᵀ W = Λ Lᵀ`, and
//!   `b(x)` is the estimator's output-side embedding
//! - modes: `P⁻¹ B`, so that `a W^{t-1} B = Re(ψ Λ^{t-1} modes)`

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::logging::NUMERICS_TARGET;
use crate::math::{C64, eig_nonsymmetric, ensure_finite, solve_least_squares};

/// Eigen-decomposition of the transfer matrix, computed once at fit time.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub eigenvalues: Vec<C64>,
    /// Right eigenvectors of `W`, one per column.
    pub vectors: DMatrix<C64>,
    /// Left eigenvectors of `W`, one per column, biorthonormal to `vectors`.
    pub left_vectors: DMatrix<C64>,
    /// `P⁻¹ B`, one row per eigenvalue.
    pub modes: DMatrix<C64>,
}

/// Serialized form: only the matrices, the spectrum is recomputed on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorMatrices {
    pub transfer: DMatrix<f64>,
    pub readout: DMatrix<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OperatorMatrices", into = "OperatorMatrices")]
pub struct ReducedOperator {
    transfer: DMatrix<f64>,
    readout: DMatrix<f64>,
    spectrum: Spectrum,
}

impl ReducedOperator {
    pub fn new(transfer: DMatrix<f64>, readout: DMatrix<f64>) -> Result<Self, AppError> {
        if transfer.nrows() != transfer.ncols() || transfer.nrows() != readout.nrows() {
            return Err(AppError::numeric(format!(
                "Inconsistent operator shapes: transfer {:?}, readout {:?}.",
                transfer.shape(),
                readout.shape()
            )));
        }
        if transfer.nrows() == 0 {
            return Err(AppError::numeric("Operator has rank 0."));
        }
        ensure_finite(&readout, "Readout matrix")?;

        let (eigenvalues, vectors) = eig_nonsymmetric(&transfer)?;
        let r = transfer.nrows();
        let identity = DMatrix::<C64>::identity(r, r);
        let inverse = match vectors.clone().lu().solve(&identity) {
            Some(m) if m.iter().all(|v| v.re.is_finite() && v.im.is_finite()) => m,
            _ => {
                tracing::warn!(target: NUMERICS_TARGET, "eigenvector matrix is singular; using its pseudo-inverse");
                solve_least_squares(&vectors, &identity)
                    .ok_or_else(|| AppError::numeric("Failed to invert the eigenvector matrix."))?
            }
        };
        let modes = &inverse * readout.map(|v| C64::new(v, 0.0));

        Ok(Self {
            transfer,
            readout,
            spectrum: Spectrum {
                eigenvalues,
                vectors,
                left_vectors: inverse.transpose(),
                modes,
            },
        })
    }

    pub fn rank(&self) -> usize {
        self.transfer.nrows()
    }

    pub fn transfer(&self) -> &DMatrix<f64> {
        &self.transfer
    }

    pub fn readout(&self) -> &DMatrix<f64> {
        &self.readout
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.spectrum
    }

    fn check_embedding(&self, embedding: &DMatrix<f64>) -> Result<(), AppError> {
        if embedding.ncols() != self.rank() {
            return Err(AppError::numeric(format!(
                "Embedding has {} columns, operator rank is {}.",
                embedding.ncols(),
                self.rank()
            )));
        }
        Ok(())
    }

    /// `a W^{t-1} B`.
    pub fn propagate(&self, embedding: &DMatrix<f64>, steps: usize) -> Result<DMatrix<f64>, AppError> {
        if steps == 0 {
            return Err(AppError::input("Number of prediction steps must be >= 1."));
        }
        self.check_embedding(embedding)?;
        let mut z = embedding.clone();
        for _ in 1..steps {
            z = z * &self.transfer;
        }
        Ok(z * &self.readout)
    }

    /// Right eigenfunctions `a P` evaluated on an embedding.
    pub fn eigenfunctions(&self, embedding: &DMatrix<f64>) -> Result<DMatrix<C64>, AppError> {
        self.check_embedding(embedding)?;
        Ok(embedding.map(|v| C64::new(v, 0.0)) * &self.spectrum.vectors)
    }

    /// Left eigenfunctions `b L` evaluated on an output-side embedding.
    pub fn left_eigenfunctions(&self, output_side: &DMatrix<f64>) -> Result<DMatrix<C64>, AppError> {
        self.check_embedding(output_side)?;
        Ok(output_side.map(|v| C64::new(v, 0.0)) * &self.spectrum.left_vectors)
    }

    /// Modes `P⁻¹ R` of an observable whose readout is `R` (`rank` rows).
    pub fn modes_of(&self, readout: &DMatrix<f64>) -> Result<DMatrix<C64>, AppError> {
        if readout.nrows() != self.rank() {
            return Err(AppError::input(format!(
                "Observable readout has {} rows, operator rank is {}.",
                readout.nrows(),
                self.rank()
            )));
        }
        ensure_finite(readout, "Observable readout")?;
        Ok(self.spectrum.left_vectors.transpose() * readout.map(|v| C64::new(v, 0.0)))
    }

    /// `Re(ψ Λ^{t-1} modes)`.
    pub fn forecast(&self, embedding: &DMatrix<f64>, steps: usize) -> Result<DMatrix<f64>, AppError> {
        if steps == 0 {
            return Err(AppError::input("Number of forecast steps must be >= 1."));
        }
        let mut psi = self.eigenfunctions(embedding)?;
        for (j, lambda) in self.spectrum.eigenvalues.iter().enumerate() {
            let factor = lambda.powu((steps - 1) as u32);
            psi.column_mut(j).apply(|v| *v *= factor);
        }
        Ok((psi * &self.spectrum.modes).map(|v| v.re))
    }

    /// `‖ψ(Y) − ψ(X) Λ‖_F / sqrt(n r)` from the embeddings of inputs and outputs.
    pub fn spectral_error(
        &self,
        input_embedding: &DMatrix<f64>,
        output_embedding: &DMatrix<f64>,
    ) -> Result<f64, AppError> {
        let psi_x = self.eigenfunctions(input_embedding)?;
        let psi_y = self.eigenfunctions(output_embedding)?;
        if psi_x.nrows() != psi_y.nrows() || psi_x.nrows() == 0 {
            return Err(AppError::data("Spectral error needs matching, non-empty embeddings."));
        }

        let err = psi_y - psi_x * self.eigenvalue_diagonal();
        Ok(err.norm() / ((input_embedding.nrows() * self.rank()) as f64).sqrt())
    }

    /// `‖ξ(X) − ξ(Y) Λ‖_F / sqrt(n r)` from the output-side embeddings of
    /// inputs and outputs.
    pub fn left_spectral_error(
        &self,
        input_side: &DMatrix<f64>,
        output_side: &DMatrix<f64>,
    ) -> Result<f64, AppError> {
        let xi_x = self.left_eigenfunctions(input_side)?;
        let xi_y = self.left_eigenfunctions(output_side)?;
        if xi_x.nrows() != xi_y.nrows() || xi_x.nrows() == 0 {
            return Err(AppError::data("Spectral error needs matching, non-empty embeddings."));
        }
        let err = xi_x - xi_y * self.eigenvalue_diagonal();
        Ok(err.norm() / ((input_side.nrows() * self.rank()) as f64).sqrt())
    }

    fn eigenvalue_diagonal(&self) -> DMatrix<C64> {
        DMatrix::from_diagonal(&nalgebra::DVector::from_vec(self.spectrum.eigenvalues.clone()))
    }
}

impl TryFrom<OperatorMatrices> for ReducedOperator {
    type Error = AppError;

    fn try_from(m: OperatorMatrices) -> Result<Self, Self::Error> {
        Self::new(m.transfer, m.readout)
    }
}

impl From<ReducedOperator> for OperatorMatrices {
    fn from(op: ReducedOperator) -> Self {
        Self {
            transfer: op.transfer,
            readout: op.readout,
        }
    }
}
