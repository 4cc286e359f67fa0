//! Nystroem kernel DMD: primal regression on Nystroem features.
//!
//! `n_centers` training inputs are drawn at random (seeded) as centers `C`.
//! The feature map `Φ(x) = k(x, C) K_CC^{-1/2}` satisfies
//! `Φ(x) Φ(y)ᵀ ≈ k(x, y)`, so a primal regression on `Φ` approximates the
//! kernel estimator at a cost linear in the number of training windows.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::ContextBatch;
use crate::error::AppError;
use crate::estimators::primal::PrimalFit;
use crate::estimators::{KoopmanEstimator, ReducedOperator, Regression, check_input_width, validate_low_rank};
use crate::kernels::Kernel;
use crate::math::psd_whitening;

const NAME: &str = "NystroemKernelDMD";

const WHITENING_REL_TOL: f64 = 1e-10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NystroemKernelDmd {
    pub kernel: Kernel,
    pub rank: usize,
    pub tikhonov_reg: f64,
    #[serde(default)]
    pub regression: Regression,
    pub n_centers: usize,
    #[serde(default)]
    pub seed: u64,
    fitted: Option<NystroemFit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NystroemFit {
    centers: DMatrix<f64>,
    whitening: DMatrix<f64>,
    primal: PrimalFit,
}

impl NystroemFit {
    fn features(&self, kernel: &Kernel, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        kernel.gram_apply(inputs, &self.centers, &self.whitening)
    }
}

impl NystroemKernelDmd {
    pub fn new(kernel: Kernel, rank: usize, tikhonov_reg: f64, n_centers: usize) -> Self {
        Self {
            kernel,
            rank,
            tikhonov_reg,
            regression: Regression::default(),
            n_centers,
            seed: 0,
            fitted: None,
        }
    }

    pub fn with_regression(mut self, regression: Regression) -> Self {
        self.regression = regression;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of centers actually used (clamped to the training size).
    pub fn centers_used(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.centers.nrows())
    }

    fn fitted(&self) -> Result<&NystroemFit, AppError> {
        self.fitted.as_ref().ok_or_else(|| AppError::not_fitted(NAME))
    }
}

impl KoopmanEstimator for NystroemKernelDmd {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, batch: &ContextBatch) -> Result<(), AppError> {
        let n = batch.len();
        validate_low_rank(NAME, self.rank, self.tikhonov_reg, n)?;
        self.kernel.validate()?;
        if self.n_centers == 0 {
            return Err(AppError::input(format!("{NAME}: n_centers must be >= 1.")));
        }

        let n_centers = self.n_centers.min(n);
        if n_centers < self.n_centers {
            tracing::debug!(requested = self.n_centers, used = n_centers, "fewer windows than Nystroem centers");
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picked = rand::seq::index::sample(&mut rng, n, n_centers).into_vec();
        picked.sort_unstable();
        let centers = batch.inputs().select_rows(picked.iter());

        let k_cc = self.kernel.gram_sym(&centers)?;
        let whitening = psd_whitening(&k_cc, WHITENING_REL_TOL)?;

        let phi_x = self.kernel.gram_apply(batch.inputs(), &centers, &whitening)?;
        let phi_y = self.kernel.gram_apply(batch.outputs(), &centers, &whitening)?;
        let primal = PrimalFit::fit(
            &phi_x,
            &phi_y,
            batch.outputs(),
            self.rank,
            self.tikhonov_reg,
            self.regression,
        )?;

        tracing::debug!(
            n,
            centers = n_centers,
            features = whitening.ncols(),
            train_risk = primal.train_risk,
            "fitted Nystroem kernel DMD"
        );

        self.fitted = Some(NystroemFit {
            centers,
            whitening,
            primal,
        });
        Ok(())
    }

    fn operator(&self) -> Result<&ReducedOperator, AppError> {
        Ok(&self.fitted()?.primal.operator)
    }

    fn embed(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        check_input_width(NAME, fit.centers.ncols(), inputs)?;
        fit.primal.embed(&fit.features(&self.kernel, inputs)?)
    }

    fn embed_left(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        check_input_width(NAME, fit.centers.ncols(), inputs)?;
        fit.primal.embed_left(&fit.features(&self.kernel, inputs)?)
    }

    fn readout_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.fitted()?.primal.readout_of(values)
    }

    fn risk(&self, batch: Option<&ContextBatch>) -> Result<f64, AppError> {
        let fit = self.fitted()?;
        let Some(batch) = batch else {
            return Ok(fit.primal.train_risk);
        };
        check_input_width(NAME, fit.centers.ncols(), batch.inputs())?;
        let phi_x = fit.features(&self.kernel, batch.inputs())?;
        let phi_y = fit.features(&self.kernel, batch.outputs())?;
        fit.primal.risk(&phi_x, &phi_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DynamicalSystem, Lorenz63, Trajectory, rescale};
    use crate::estimators::KernelDmd;

    fn lorenz_batches() -> (ContextBatch, ContextBatch) {
        let traj = Lorenz63::default().sample(&[1.0, 1.0, 1.0], 700).unwrap();
        let (scaled, _) = rescale(&traj).unwrap();
        let train = ContextBatch::from_trajectory(&scaled.head(601).unwrap(), 2).unwrap();
        let test = ContextBatch::from_trajectory(&scaled.tail(51).unwrap(), 2).unwrap();
        (train, test)
    }

    #[test]
    fn all_centers_reproduce_the_kernel_estimator() {
        // A closed loop of scattered points: every output is also an input,
        // so with all inputs as centers the Nystroem kernel is exact.
        let mut rng = StdRng::seed_from_u64(21);
        let mut rows: Vec<Vec<f64>> = (0..30)
            .map(|_| {
                use rand::Rng;
                vec![rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)]
            })
            .collect();
        rows.push(rows[0].clone());
        let train = ContextBatch::from_trajectory(&Trajectory::from_rows(&rows).unwrap(), 2).unwrap();
        let kernel = Kernel::Rbf { length_scale: 0.5 };

        let mut exact = KernelDmd::new(kernel, 4, 1e-3);
        exact.fit(&train).unwrap();
        let mut approx = NystroemKernelDmd::new(kernel, 4, 1e-3, 30);
        approx.fit(&train).unwrap();
        assert_eq!(approx.centers_used(), Some(30));

        let a = exact.predict(&train).unwrap();
        let b = approx.predict(&train).unwrap();
        assert!((a - b).norm() < 1e-6);
        assert!((exact.risk(None).unwrap() - approx.risk(None).unwrap()).abs() < 1e-6);
    }

    #[test]
    fn nystroem_predicts_lorenz_one_step() {
        let (train, test) = lorenz_batches();
        let mut est = NystroemKernelDmd::new(Kernel::Rbf { length_scale: 0.5 }, 25, 1e-6, 100).with_seed(3);
        est.fit(&train).unwrap();

        let pred = test.last_state(&est.predict(&test).unwrap()).unwrap();
        let err = crate::math::rmse(&pred, test.targets()).unwrap();
        assert!(err < 0.05, "rmse {err}");
        assert!(est.risk(Some(&test)).unwrap().is_finite());
        assert!(est.eigvals().unwrap()[0].norm() <= 1.1);
    }

    #[test]
    fn fit_is_seeded() {
        let (train, _) = lorenz_batches();
        let train = train.head(200).unwrap();
        let fit = |seed| {
            let mut est = NystroemKernelDmd::new(Kernel::default(), 4, 1e-6, 30).with_seed(seed);
            est.fit(&train).unwrap();
            est.eigvals().unwrap()
        };
        assert_eq!(fit(1), fit(1));
    }

    #[test]
    fn unfitted_estimator_errors() {
        let est = NystroemKernelDmd::new(Kernel::default(), 2, 1e-6, 10);
        assert!(est.modes().is_err());
    }
}
