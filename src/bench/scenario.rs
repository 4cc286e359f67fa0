//! Benchmark scenario: trajectory generation, rescaling and the train/test split.
//!
//! The trajectory is rescaled as a whole, then the training windows are taken
//! from its head and the test windows from its tail. Whatever lies between
//! (`n_val` states by default) is not used by the sweep.

use crate::config::SweepConfig;
use crate::data::{ContextBatch, DynamicalSystem, MockSystem, Rescaler, Trajectory, rescale};
use crate::domain::SystemKind;
use crate::error::AppError;
use crate::io::load_trajectory_csv;

#[derive(Debug, Clone)]
pub struct Scenario {
    /// The rescaled trajectory.
    pub trajectory: Trajectory,
    pub rescaler: Rescaler,
    pub columns: Vec<String>,
    pub train: ContextBatch,
    pub test: ContextBatch,
}

pub fn build_scenario(config: &SweepConfig) -> Result<Scenario, AppError> {
    let (raw, columns) = match &config.trajectory_csv {
        Some(path) => {
            let ingest = load_trajectory_csv(path, config.trajectory_columns.as_deref())?;
            (ingest.trajectory, ingest.columns)
        }
        None => {
            let raw = match config.system {
                SystemKind::Lorenz63 => config.lorenz.sample(&config.initial_condition, config.n_states())?,
                SystemKind::Mock => MockSystem {
                    dim: config.initial_condition.len(),
                    seed: config.seed,
                }
                .sample(&config.initial_condition, config.n_states())?,
            };
            let columns = default_column_names(raw.dim());
            (raw, columns)
        }
    };

    let (trajectory, rescaler) = rescale(&raw)?;
    let (train, test) = split_windows(&trajectory, config.n_train, config.n_test, config.context_len)?;

    tracing::info!(
        states = trajectory.len(),
        dim = trajectory.dim(),
        train_windows = train.len(),
        test_windows = test.len(),
        "built sweep scenario"
    );

    Ok(Scenario {
        trajectory,
        rescaler,
        columns,
        train,
        test,
    })
}

/// `n_train` windows from the head and `n_test` windows from the tail.
///
/// With window length `L` this uses the first `n_train + L - 1` and the last
/// `n_test + L - 1` states, which must not overlap.
pub fn split_windows(
    trajectory: &Trajectory,
    n_train: usize,
    n_test: usize,
    context_len: usize,
) -> Result<(ContextBatch, ContextBatch), AppError> {
    if context_len < 2 {
        return Err(AppError::input(format!("Context length must be >= 2, got {context_len}.")));
    }
    let head = n_train + context_len - 1;
    let tail = n_test + context_len - 1;
    if head + tail > trajectory.len() {
        return Err(AppError::data(format!(
            "{} states cannot hold {n_train} training and {n_test} test windows of length {context_len} without overlap.",
            trajectory.len()
        )));
    }

    let train = ContextBatch::from_trajectory(&trajectory.head(head)?, context_len)?;
    let test = ContextBatch::from_trajectory(&trajectory.tail(tail)?, context_len)?;
    Ok((train, test))
}

fn default_column_names(dim: usize) -> Vec<String> {
    const XYZ: [&str; 3] = ["x", "y", "z"];
    if dim <= XYZ.len() {
        XYZ[..dim].iter().map(|s| s.to_string()).collect()
    } else {
        (0..dim).map(|j| format!("x{j}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_window_counts() {
        let config = SweepConfig::default();
        let scenario = build_scenario(&config).unwrap();
        assert_eq!(scenario.trajectory.len(), 11_100);
        assert_eq!(scenario.train.len(), 10_000);
        assert_eq!(scenario.test.len(), 100);
        assert_eq!(scenario.columns, vec!["x", "y", "z"]);

        // Test windows end on the last state.
        let last = scenario.trajectory.state(11_099);
        let n = scenario.test.len();
        let target: Vec<f64> = scenario.test.targets().row(n - 1).iter().copied().collect();
        assert_eq!(target, last);
        for j in 0..3 {
            let col = scenario.trajectory.states().column(j);
            assert!(col.iter().all(|v| v.abs() <= 1.0 + 1e-12));
        }
    }

    #[test]
    fn overlapping_split_is_rejected() {
        let rows: Vec<Vec<f64>> = (0..10).map(|t| vec![t as f64]).collect();
        let traj = Trajectory::from_rows(&rows).unwrap();
        let (train, test) = split_windows(&traj, 5, 3, 2).unwrap();
        assert_eq!((train.len(), test.len()), (5, 3));
        assert_eq!(test.targets()[(2, 0)], 9.0);

        let err = split_windows(&traj, 6, 3, 3).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn mock_system_uses_the_initial_condition_dimension() {
        let config = SweepConfig {
            system: SystemKind::Mock,
            initial_condition: vec![0.5; 5],
            n_train: 20,
            n_val: 2,
            n_test: 5,
            ..SweepConfig::default()
        };
        let scenario = build_scenario(&config).unwrap();
        assert_eq!(scenario.trajectory.dim(), 5);
        assert_eq!(scenario.columns[4], "x4");
        assert_eq!(scenario.trajectory.len(), 27);
        assert_eq!((scenario.train.len(), scenario.test.len()), (20, 5));

        let no_gap = SweepConfig { n_val: 0, ..config };
        assert_eq!(build_scenario(&no_gap).unwrap_err().exit_code(), 3);
    }
}
