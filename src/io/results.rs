//! Read/write sweep result JSON files.
//!
//! The result file is the portable record of a sweep:
//! - the scenario (system, window counts, kernel, rank, regularization, seed)
//! - one series of metrics per estimator configuration
//!
//! `koop plot` and `koop tui` only need this file, never the trajectory.

use std::path::Path;

use crate::domain::SweepResults;
use crate::error::AppError;
use crate::io::model::{load_json, save_json};

pub const RESULTS_TOOL: &str = "koop";

pub fn write_results_json(path: &Path, results: &SweepResults) -> Result<(), AppError> {
    save_json(path, results, "sweep results")
}

pub fn read_results_json(path: &Path) -> Result<SweepResults, AppError> {
    let results: SweepResults = load_json(path, "sweep results")?;
    if results.tool != RESULTS_TOOL {
        return Err(AppError::new(
            2,
            format!("'{}' was not written by `{RESULTS_TOOL} sweep` (tool = {}).", path.display(), results.tool),
        ));
    }
    if results.series.iter().all(|s| s.points.is_empty()) {
        return Err(AppError::new(3, format!("'{}' contains no sweep points.", path.display())));
    }
    Ok(results)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{EstimatorSeries, ScenarioInfo, SweepPoint, SystemKind};
    use crate::kernels::Kernel;
    use chrono::TimeZone;
    use tempfile::tempdir;

    /// Small hand-made result set shared by the plotting and report tests.
    pub(crate) fn sample_results() -> SweepResults {
        let point = |n: usize, t: f64, rmse: f64| SweepPoint {
            train_size: n,
            fit_time_secs: t,
            train_risk: rmse * rmse,
            rmse_onestep: rmse,
            eigenvalues: vec![[1.0, 0.0], [0.9, 0.1], [0.9, -0.1]],
        };
        SweepResults {
            tool: RESULTS_TOOL.to_string(),
            created_at: chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            scenario: ScenarioInfo {
                system: SystemKind::Lorenz63,
                n_states: 1100,
                n_train_windows: 1000,
                n_test_windows: 100,
                context_len: 2,
                kernel: Kernel::default(),
                rank: 3,
                tikhonov_reg: 1e-6,
                seed: 0,
            },
            series: vec![
                EstimatorSeries {
                    name: "KernelDMD".to_string(),
                    description: "kernel rrr, full".to_string(),
                    points: vec![point(100, 0.01, 0.1), point(1000, 1.0, 0.01)],
                },
                EstimatorSeries {
                    name: "Nystroem".to_string(),
                    description: "nystroem rrr, 250 centers".to_string(),
                    points: vec![point(100, 0.001, 0.2), point(1000, 0.01, 0.02)],
                },
            ],
        }
    }

    #[test]
    fn results_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");
        let results = sample_results();
        write_results_json(&path, &results).unwrap();
        let back = read_results_json(&path).unwrap();
        assert_eq!(back, results);
        assert_eq!(back.train_sizes(), vec![100, 1000]);
        assert!(back.series("Nystroem").is_some());
    }

    #[test]
    fn foreign_or_empty_files_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");

        let mut foreign = sample_results();
        foreign.tool = "rv".to_string();
        write_results_json(&path, &foreign).unwrap();
        assert_eq!(read_results_json(&path).unwrap_err().exit_code(), 2);

        let mut empty = sample_results();
        empty.series.iter_mut().for_each(|s| s.points.clear());
        write_results_json(&path, &empty).unwrap();
        assert_eq!(read_results_json(&path).unwrap_err().exit_code(), 3);
    }
}
