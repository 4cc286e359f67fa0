//! Context windows: fixed-length contiguous slices of a trajectory.
//!
//! A window of length `L` starting at `t` covers states `t..t+L`. Estimators
//! see a window through three views:
//!
//! - `inputs`: states `t..t+L-1`, flattened
//! - `outputs`: states `t+1..t+L`, flattened
//! - `targets`: the last state `t+L-1`
//!
//! With `L = 2` this is the familiar `(x_t, x_{t+1})` snapshot pair.

use nalgebra::{DMatrix, DMatrixView};

use crate::data::Trajectory;
use crate::error::AppError;

fn check_lengths(trajectory_len: usize, context_len: usize) -> Result<(), AppError> {
    if context_len < 2 {
        return Err(AppError::input(format!(
            "Context length must be >= 2, got {context_len}."
        )));
    }
    if context_len > trajectory_len {
        return Err(AppError::data(format!(
            "Context length {context_len} exceeds trajectory length {trajectory_len}."
        )));
    }
    Ok(())
}

/// Number of stride-1 windows of length `context_len` in `trajectory_len` states.
pub fn window_count(trajectory_len: usize, context_len: usize) -> Result<usize, AppError> {
    check_lengths(trajectory_len, context_len)?;
    Ok(trajectory_len - context_len + 1)
}

/// Lazy iterator over the windows of a trajectory.
pub struct ContextWindows<'a> {
    trajectory: &'a Trajectory,
    context_len: usize,
    next: usize,
    end: usize,
}

impl<'a> ContextWindows<'a> {
    pub fn new(trajectory: &'a Trajectory, context_len: usize) -> Result<Self, AppError> {
        let end = window_count(trajectory.len(), context_len)?;
        Ok(Self {
            trajectory,
            context_len,
            next: 0,
            end,
        })
    }
}

impl<'a> Iterator for ContextWindows<'a> {
    type Item = DMatrixView<'a, f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let t = self.next;
        self.next += 1;
        Some(self.trajectory.states().rows(t, self.context_len))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.end - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ContextWindows<'_> {}

/// All windows of a trajectory, materialized row-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBatch {
    context_len: usize,
    state_dim: usize,
    inputs: DMatrix<f64>,
    outputs: DMatrix<f64>,
    targets: DMatrix<f64>,
}

impl ContextBatch {
    pub fn from_trajectory(trajectory: &Trajectory, context_len: usize) -> Result<Self, AppError> {
        let windows = ContextWindows::new(trajectory, context_len)?;
        let n = windows.len();
        let d = trajectory.dim();
        let lookback = context_len - 1;

        let mut inputs = DMatrix::<f64>::zeros(n, lookback * d);
        let mut outputs = DMatrix::<f64>::zeros(n, lookback * d);
        let mut targets = DMatrix::<f64>::zeros(n, d);

        for (i, window) in windows.enumerate() {
            for s in 0..lookback {
                for j in 0..d {
                    inputs[(i, s * d + j)] = window[(s, j)];
                    outputs[(i, s * d + j)] = window[(s + 1, j)];
                }
            }
            for j in 0..d {
                targets[(i, j)] = window[(lookback, j)];
            }
        }

        Ok(Self {
            context_len,
            state_dim: d,
            inputs,
            outputs,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }

    pub fn context_len(&self) -> usize {
        self.context_len
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn inputs(&self) -> &DMatrix<f64> {
        &self.inputs
    }

    pub fn outputs(&self) -> &DMatrix<f64> {
        &self.outputs
    }

    pub fn targets(&self) -> &DMatrix<f64> {
        &self.targets
    }

    /// Windows `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Result<Self, AppError> {
        if start >= end || end > self.len() {
            return Err(AppError::data(format!(
                "Invalid window range {start}..{end} for a batch of {} windows.",
                self.len()
            )));
        }
        let rows = end - start;
        Ok(Self {
            context_len: self.context_len,
            state_dim: self.state_dim,
            inputs: self.inputs.rows(start, rows).into_owned(),
            outputs: self.outputs.rows(start, rows).into_owned(),
            targets: self.targets.rows(start, rows).into_owned(),
        })
    }

    /// First `n` windows.
    pub fn head(&self, n: usize) -> Result<Self, AppError> {
        self.slice(0, n)
    }

    /// Last `n` windows.
    pub fn tail(&self, n: usize) -> Result<Self, AppError> {
        if n > self.len() {
            return Err(AppError::data(format!(
                "Requested the last {n} windows of a batch with {} windows.",
                self.len()
            )));
        }
        self.slice(self.len() - n, self.len())
    }

    /// Windows at the given indices, in order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, AppError> {
        if indices.is_empty() {
            return Err(AppError::data("Cannot select an empty set of windows."));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(AppError::data(format!(
                "Window index {bad} out of range for a batch of {} windows.",
                self.len()
            )));
        }
        Ok(Self {
            context_len: self.context_len,
            state_dim: self.state_dim,
            inputs: self.inputs.select_rows(indices.iter()),
            outputs: self.outputs.select_rows(indices.iter()),
            targets: self.targets.select_rows(indices.iter()),
        })
    }

    /// Last state of each row of a prediction of `outputs`.
    pub fn last_state(&self, predicted_outputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let width = self.outputs.ncols();
        if predicted_outputs.ncols() != width {
            return Err(AppError::numeric(format!(
                "Prediction has {} columns, expected {width}.",
                predicted_outputs.ncols()
            )));
        }
        Ok(predicted_outputs
            .columns(width - self.state_dim, self.state_dim)
            .into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, d: usize) -> Trajectory {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|t| (0..d).map(|j| (t * 10 + j) as f64).collect())
            .collect();
        Trajectory::from_rows(&rows).unwrap()
    }

    #[test]
    fn window_counts_match_scenario() {
        assert_eq!(window_count(11_100, 2).unwrap(), 11_099);
        assert_eq!(window_count(10_001, 2).unwrap(), 10_000);
        assert_eq!(window_count(101, 2).unwrap(), 100);
    }

    #[test]
    fn lazy_iterator_yields_every_window() {
        let traj = ramp(7, 2);
        let windows = ContextWindows::new(&traj, 3).unwrap();
        assert_eq!(windows.len(), 5);
        let all: Vec<_> = windows.collect();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|w| w.nrows() == 3));
        assert_eq!(all[4][(2, 1)], 61.0);
    }

    #[test]
    fn consecutive_windows_overlap() {
        let traj = ramp(9, 2);
        let windows: Vec<_> = ContextWindows::new(&traj, 4).unwrap().collect();
        for pair in windows.windows(2) {
            assert_eq!(pair[0].rows(1, 3), pair[1].rows(0, 3));
        }
    }

    #[test]
    fn batch_views_are_shifted_by_one_state() {
        let traj = ramp(6, 2);
        let batch = ContextBatch::from_trajectory(&traj, 3).unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.inputs().row(1).iter().copied().collect::<Vec<_>>(), vec![10.0, 11.0, 20.0, 21.0]);
        assert_eq!(batch.outputs().row(1).iter().copied().collect::<Vec<_>>(), vec![20.0, 21.0, 30.0, 31.0]);
        assert_eq!(batch.targets().row(1).iter().copied().collect::<Vec<_>>(), vec![30.0, 31.0]);

        let last = batch.last_state(batch.outputs()).unwrap();
        assert_eq!(&last, batch.targets());
    }

    #[test]
    fn invalid_context_lengths_are_rejected() {
        let traj = ramp(3, 1);
        assert!(ContextBatch::from_trajectory(&traj, 1).is_err());
        assert!(ContextBatch::from_trajectory(&traj, 4).is_err());
        assert_eq!(ContextBatch::from_trajectory(&traj, 3).unwrap().len(), 1);
    }

    #[test]
    fn head_tail_and_select() {
        let batch = ContextBatch::from_trajectory(&ramp(10, 1), 2).unwrap();
        assert_eq!(batch.head(3).unwrap().len(), 3);
        assert_eq!(batch.tail(2).unwrap().inputs()[(0, 0)], 70.0);
        let picked = batch.select(&[4, 0]).unwrap();
        assert_eq!(picked.inputs()[(0, 0)], 40.0);
        assert_eq!(picked.outputs()[(1, 0)], 10.0);
        assert!(batch.select(&[10]).is_err());
    }
}
