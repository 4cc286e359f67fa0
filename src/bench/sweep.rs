//! Training-set-size sweep over the configured estimators.
//!
//! For every size and every estimator: build a fresh estimator, fit it on the
//! first `size` training windows, time the fit, then record the training risk,
//! the one-step rMSE on the test windows and the eigenvalues. Any error aborts
//! the sweep and names the estimator and size it came from.

use std::time::Instant;

use chrono::Utc;

use crate::bench::Scenario;
use crate::config::SweepConfig;
use crate::domain::{BenchEstimator, EstimatorSeries, EstimatorSpec, ScenarioInfo, SweepPoint, SweepResults};
use crate::error::AppError;
use crate::estimators::KoopmanEstimator;
use crate::io::RESULTS_TOOL;
use crate::math::{geometric_sizes, rmse};

/// Sweep outputs: the metrics and the estimators fitted at the largest size.
#[derive(Debug, Clone)]
pub struct SweepOutput {
    pub results: SweepResults,
    pub fitted: Vec<(String, BenchEstimator)>,
}

pub fn run_sweep(config: &SweepConfig, scenario: &Scenario) -> Result<SweepOutput, AppError> {
    config.validate()?;
    let sizes = geometric_sizes(config.size_min, config.size_max, config.size_steps, scenario.train.len())?;
    tracing::info!(?sizes, estimators = config.estimators.len(), "starting sweep");

    let mut series = Vec::with_capacity(config.estimators.len());
    let mut fitted = Vec::with_capacity(config.estimators.len());

    for spec in &config.estimators {
        let mut points = Vec::with_capacity(sizes.len());
        let mut last = None;
        for &size in &sizes {
            let (point, estimator) = run_point(config, scenario, spec, size)
                .map_err(|e| AppError::new(e.exit_code(), format!("{} at size {size}: {}", spec.name, e.message())))?;
            tracing::info!(
                estimator = %spec.name,
                size,
                fit_time_secs = point.fit_time_secs,
                train_risk = point.train_risk,
                rmse = point.rmse_onestep,
                "sweep point"
            );
            points.push(point);
            last = Some(estimator);
        }
        if let Some(estimator) = last {
            fitted.push((spec.name.clone(), estimator));
        }
        series.push(EstimatorSeries {
            name: spec.name.clone(),
            description: spec.describe(),
            points,
        });
    }

    let results = SweepResults {
        tool: RESULTS_TOOL.to_string(),
        created_at: Utc::now(),
        scenario: ScenarioInfo {
            system: config.system,
            n_states: scenario.trajectory.len(),
            n_train_windows: scenario.train.len(),
            n_test_windows: scenario.test.len(),
            context_len: config.context_len,
            kernel: config.kernel,
            rank: config.rank,
            tikhonov_reg: config.tikhonov_reg,
            seed: config.seed,
        },
        series,
    };
    Ok(SweepOutput { results, fitted })
}

fn run_point(
    config: &SweepConfig,
    scenario: &Scenario,
    spec: &EstimatorSpec,
    size: usize,
) -> Result<(SweepPoint, BenchEstimator), AppError> {
    let train = scenario.train.head(size)?;
    let mut estimator = spec.build(config.kernel, config.rank, config.tikhonov_reg, config.seed);

    let start = Instant::now();
    estimator.fit(&train)?;
    let fit_time_secs = start.elapsed().as_secs_f64();

    let train_risk = estimator.risk(None)?;
    let predicted = estimator.predict(&scenario.test)?;
    let rmse_onestep = rmse(&scenario.test.last_state(&predicted)?, scenario.test.targets())?;
    let eigenvalues = estimator.eigvals()?.iter().map(|l| [l.re, l.im]).collect();

    let point = SweepPoint {
        train_size: size,
        fit_time_secs,
        train_risk,
        rmse_onestep,
        eigenvalues,
    };
    Ok((point, estimator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::build_scenario;
    use crate::kernels::Kernel;

    fn small_config() -> SweepConfig {
        SweepConfig {
            n_train: 200,
            n_val: 20,
            n_test: 30,
            size_min: 40,
            size_max: 200,
            size_steps: 3,
            rank: 5,
            kernel: Kernel::Rbf { length_scale: 0.5 },
            estimators: vec![
                EstimatorSpec::kernel_dmd("KernelDMD"),
                EstimatorSpec::randomized("RandSVD", 1, 5),
                EstimatorSpec::nystroem("Nystroem", 50),
            ],
            ..SweepConfig::default()
        }
    }

    #[test]
    fn sweep_records_every_estimator_and_size() {
        let config = small_config();
        let scenario = build_scenario(&config).unwrap();
        let output = run_sweep(&config, &scenario).unwrap();
        let results = &output.results;

        assert_eq!(results.series.len(), 3);
        assert_eq!(results.train_sizes(), vec![40, 89, 200]);
        assert_eq!(results.scenario.n_train_windows, 200);
        assert_eq!(results.scenario.n_test_windows, 30);
        for series in &results.series {
            assert_eq!(series.points.len(), 3);
            for p in &series.points {
                assert!((1..=5).contains(&p.eigenvalues.len()));
                assert!(p.rmse_onestep.is_finite());
                assert!(p.train_risk >= -1e-9);
                assert!(p.fit_time_secs >= 0.0);
            }
        }
        assert_eq!(output.fitted.len(), 3);
        assert!(output.fitted.iter().all(|(_, e)| e.is_fitted()));
    }

    #[test]
    fn fixed_seed_gives_identical_spectra() {
        let config = small_config();
        let scenario = build_scenario(&config).unwrap();
        let a = run_sweep(&config, &scenario).unwrap().results;
        let b = run_sweep(&config, &scenario).unwrap().results;
        for (sa, sb) in a.series.iter().zip(&b.series) {
            for (pa, pb) in sa.points.iter().zip(&sb.points) {
                assert_eq!(pa.eigenvalues, pb.eigenvalues);
                assert_eq!(pa.rmse_onestep, pb.rmse_onestep);
                assert_eq!(pa.train_risk, pb.train_risk);
            }
        }
    }

    #[test]
    fn errors_name_the_failing_estimator() {
        let mut config = small_config();
        config.estimators = vec![EstimatorSpec::randomized("TooWide", 1, 50)];
        let scenario = build_scenario(&config).unwrap();
        // rank 5 + 50 oversamples exceeds the 40 windows of the first size.
        let err = run_sweep(&config, &scenario).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.message().starts_with("TooWide at size 40"));
    }
}
