//! Shared domain types.
//!
//! These types are kept serializable so they can be:
//!
//! - built from the TOML config and the CLI
//! - exported to JSON/CSV by `koop sweep` and `koop vampnet`
//! - reloaded later by `koop plot` and `koop tui`

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::data::ContextBatch;
use crate::error::AppError;
use crate::estimators::{KernelDmd, KoopmanEstimator, NystroemKernelDmd, ReducedOperator, Regression, SvdSolver};
use crate::kernels::Kernel;
use crate::math::C64;

/// Which dynamical system generates the benchmark trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    #[default]
    Lorenz63,
    /// i.i.d. uniform states, for smoke tests.
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EstimatorKind {
    KernelDmd,
    Nystroem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    #[default]
    Full,
    Randomized,
}

/// One named estimator configuration of a sweep.
///
/// Kernel, rank, regularization and seed are shared by the whole sweep and
/// supplied to [`EstimatorSpec::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSpec {
    pub name: String,
    pub kind: EstimatorKind,
    #[serde(default)]
    pub regression: Regression,
    #[serde(default)]
    pub solver: SolverKind,
    #[serde(default = "default_iterated_power")]
    pub iterated_power: usize,
    #[serde(default = "default_n_oversamples")]
    pub n_oversamples: usize,
    #[serde(default = "default_n_centers")]
    pub n_centers: usize,
}

fn default_iterated_power() -> usize {
    1
}

fn default_n_oversamples() -> usize {
    5
}

fn default_n_centers() -> usize {
    250
}

impl EstimatorSpec {
    pub fn kernel_dmd(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EstimatorKind::KernelDmd,
            regression: Regression::default(),
            solver: SolverKind::Full,
            iterated_power: default_iterated_power(),
            n_oversamples: default_n_oversamples(),
            n_centers: default_n_centers(),
        }
    }

    pub fn randomized(name: &str, iterated_power: usize, n_oversamples: usize) -> Self {
        Self {
            solver: SolverKind::Randomized,
            iterated_power,
            n_oversamples,
            ..Self::kernel_dmd(name)
        }
    }

    pub fn nystroem(name: &str, n_centers: usize) -> Self {
        Self {
            kind: EstimatorKind::Nystroem,
            n_centers,
            ..Self::kernel_dmd(name)
        }
    }

    /// The three estimators compared by the Lorenz-63 benchmark.
    pub fn benchmark_defaults() -> Vec<Self> {
        vec![
            Self::kernel_dmd("KernelDMD"),
            Self::randomized("RandSVD", 1, 5),
            Self::nystroem("Nystroem", 250),
        ]
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::input("Estimator names must not be empty."));
        }
        if self.kind == EstimatorKind::Nystroem && self.n_centers == 0 {
            return Err(AppError::input(format!("{}: n_centers must be >= 1.", self.name)));
        }
        if self.kind == EstimatorKind::Nystroem && self.solver == SolverKind::Randomized {
            return Err(AppError::input(format!(
                "{}: the randomized solver only applies to kernel-dmd estimators.",
                self.name
            )));
        }
        Ok(())
    }

    /// Short human-readable description used in reports.
    pub fn describe(&self) -> String {
        let regression = match self.regression {
            Regression::ReducedRank => "rrr",
            Regression::PrincipalComponent => "pcr",
        };
        match (self.kind, self.solver) {
            (EstimatorKind::Nystroem, _) => format!("nystroem {regression}, {} centers", self.n_centers),
            (EstimatorKind::KernelDmd, SolverKind::Full) => format!("kernel {regression}, full"),
            (EstimatorKind::KernelDmd, SolverKind::Randomized) => format!(
                "kernel {regression}, randomized (q={}, p={})",
                self.iterated_power, self.n_oversamples
            ),
        }
    }

    /// Build a fresh, unfitted estimator.
    pub fn build(&self, kernel: Kernel, rank: usize, tikhonov_reg: f64, seed: u64) -> BenchEstimator {
        match self.kind {
            EstimatorKind::KernelDmd => {
                let solver = match self.solver {
                    SolverKind::Full => SvdSolver::Full,
                    SolverKind::Randomized => SvdSolver::Randomized {
                        iterated_power: self.iterated_power,
                        n_oversamples: self.n_oversamples,
                    },
                };
                BenchEstimator::KernelDmd(
                    KernelDmd::new(kernel, rank, tikhonov_reg)
                        .with_regression(self.regression)
                        .with_svd_solver(solver)
                        .with_seed(seed),
                )
            }
            EstimatorKind::Nystroem => BenchEstimator::Nystroem(
                NystroemKernelDmd::new(kernel, rank, tikhonov_reg, self.n_centers)
                    .with_regression(self.regression)
                    .with_seed(seed),
            ),
        }
    }
}

/// A kernel estimator as built by a sweep; serializable as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "estimator", rename_all = "kebab-case")]
pub enum BenchEstimator {
    KernelDmd(KernelDmd),
    Nystroem(NystroemKernelDmd),
}

impl BenchEstimator {
    fn inner(&self) -> &dyn KoopmanEstimator {
        match self {
            BenchEstimator::KernelDmd(e) => e,
            BenchEstimator::Nystroem(e) => e,
        }
    }
}

impl KoopmanEstimator for BenchEstimator {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn fit(&mut self, batch: &ContextBatch) -> Result<(), AppError> {
        match self {
            BenchEstimator::KernelDmd(e) => e.fit(batch),
            BenchEstimator::Nystroem(e) => e.fit(batch),
        }
    }

    fn operator(&self) -> Result<&ReducedOperator, AppError> {
        self.inner().operator()
    }

    fn embed(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.inner().embed(inputs)
    }

    fn embed_left(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.inner().embed_left(inputs)
    }

    fn readout_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.inner().readout_of(values)
    }

    fn risk(&self, batch: Option<&ContextBatch>) -> Result<f64, AppError> {
        self.inner().risk(batch)
    }
}

/// Metrics of one estimator fitted at one training-set size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub train_size: usize,
    pub fit_time_secs: f64,
    pub train_risk: f64,
    pub rmse_onestep: f64,
    /// `[re, im]`, sorted by decreasing modulus.
    pub eigenvalues: Vec<[f64; 2]>,
}

impl SweepPoint {
    pub fn eigenvalues(&self) -> Vec<C64> {
        self.eigenvalues.iter().map(|&[re, im]| C64::new(re, im)).collect()
    }

    pub fn spectral_radius(&self) -> f64 {
        self.eigenvalues()
            .iter()
            .map(|l| l.norm())
            .fold(0.0_f64, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSeries {
    pub name: String,
    pub description: String,
    pub points: Vec<SweepPoint>,
}

/// Sweep scenario as it was run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub system: SystemKind,
    pub n_states: usize,
    pub n_train_windows: usize,
    pub n_test_windows: usize,
    pub context_len: usize,
    pub kernel: Kernel,
    pub rank: usize,
    pub tikhonov_reg: f64,
    pub seed: u64,
}

/// The sweep result file (`koop sweep --out`), read back by `koop plot` / `koop tui`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResults {
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub scenario: ScenarioInfo,
    pub series: Vec<EstimatorSeries>,
}

impl SweepResults {
    pub fn series(&self, name: &str) -> Option<&EstimatorSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Union of the training sizes over all series, ascending.
    pub fn train_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self
            .series
            .iter()
            .flat_map(|s| s.points.iter().map(|p| p.train_size))
            .collect();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }
}

/// Metrics of one training epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean VAMP-2 score over the epoch's mini-batches.
    pub train_score: f64,
    #[serde(default)]
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn completed_epochs(&self) -> usize {
        self.epochs.last().map_or(0, |m| m.epoch)
    }

    /// Attach an accuracy to an already recorded epoch.
    pub fn set_accuracy(&mut self, epoch: usize, accuracy: f64) {
        if let Some(m) = self.epochs.iter_mut().rev().find(|m| m.epoch == epoch) {
            m.val_accuracy = Some(accuracy);
        }
    }

    pub fn best_accuracy(&self) -> Option<(usize, f64)> {
        self.epochs
            .iter()
            .filter_map(|m| m.val_accuracy.map(|a| (m.epoch, a)))
            .fold(None, |best, (epoch, acc)| match best {
                Some((_, b)) if b >= acc => best,
                _ => Some((epoch, acc)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Trajectory;

    #[test]
    fn estimator_spec_defaults_fill_in_from_json() {
        let spec: EstimatorSpec = serde_json::from_str(r#"{"name":"R","kind":"kernel-dmd","solver":"randomized"}"#).unwrap();
        assert_eq!(spec, EstimatorSpec::randomized("R", 1, 5));
        assert_eq!(spec.describe(), "kernel rrr, randomized (q=1, p=5)");
    }

    #[test]
    fn validation_rejects_bad_specs() {
        assert!(EstimatorSpec::kernel_dmd(" ").validate().is_err());
        assert!(EstimatorSpec::nystroem("N", 0).validate().is_err());
        let mut spec = EstimatorSpec::nystroem("N", 10);
        spec.solver = SolverKind::Randomized;
        assert!(spec.validate().is_err());
        for spec in EstimatorSpec::benchmark_defaults() {
            spec.validate().unwrap();
        }
    }

    #[test]
    fn built_estimators_fit_through_the_enum() {
        let rows: Vec<Vec<f64>> = (0..40).map(|t| vec![(0.3 * t as f64).sin(), (0.3 * t as f64).cos()]).collect();
        let batch = ContextBatch::from_trajectory(&Trajectory::from_rows(&rows).unwrap(), 2).unwrap();
        for spec in [EstimatorSpec::kernel_dmd("K"), EstimatorSpec::nystroem("N", 20)] {
            let mut est = spec.build(Kernel::Rbf { length_scale: 1.0 }, 3, 1e-6, 0);
            assert!(!est.is_fitted());
            est.fit(&batch).unwrap();
            assert_eq!(est.eigvals().unwrap().len(), 3);
        }
        let est = EstimatorSpec::nystroem("N", 20).build(Kernel::Linear, 2, 1e-6, 0);
        assert_eq!(est.name(), "NystroemKernelDMD");
    }

    #[test]
    fn history_tracks_best_accuracy() {
        let mut history = TrainingHistory::default();
        for epoch in 1..=3 {
            history.push(EpochMetrics {
                epoch,
                train_score: epoch as f64,
                val_accuracy: None,
            });
        }
        assert_eq!(history.best_accuracy(), None);
        history.set_accuracy(1, 0.5);
        history.set_accuracy(3, 0.75);
        assert_eq!(history.best_accuracy(), Some((3, 0.75)));
        assert_eq!(history.completed_epochs(), 3);
    }

    #[test]
    fn spectral_radius_uses_the_modulus() {
        let p = SweepPoint {
            train_size: 10,
            fit_time_secs: 0.0,
            train_risk: 0.0,
            rmse_onestep: 0.0,
            eigenvalues: vec![[0.6, 0.8], [0.5, 0.0]],
        };
        assert!((p.spectral_radius() - 1.0).abs() < 1e-12);
    }
}
