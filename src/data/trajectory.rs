//! Trajectories and per-dimension rescaling.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Ordered sequence of states: row `t` is the state at time `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    states: DMatrix<f64>,
}

impl Trajectory {
    pub fn new(states: DMatrix<f64>) -> Result<Self, AppError> {
        if states.nrows() == 0 || states.ncols() == 0 {
            return Err(AppError::data("Trajectory must contain at least one state of dimension >= 1."));
        }
        if let Some(pos) = states.iter().position(|v| !v.is_finite()) {
            let row = pos % states.nrows();
            return Err(AppError::input(format!("Trajectory contains a non-finite value at time {row}.")));
        }
        Ok(Self { states })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, AppError> {
        let Some(first) = rows.first() else {
            return Err(AppError::data("Trajectory must contain at least one state."));
        };
        let dim = first.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != dim) {
            return Err(AppError::input(format!(
                "State {bad} has dimension {}, expected {dim}.",
                rows[bad].len()
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(DMatrix::from_row_slice(rows.len(), dim, &flat))
    }

    pub fn len(&self) -> usize {
        self.states.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.states.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.states.ncols()
    }

    pub fn states(&self) -> &DMatrix<f64> {
        &self.states
    }

    pub fn state(&self, t: usize) -> Vec<f64> {
        self.states.row(t).iter().copied().collect()
    }

    /// States `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Result<Self, AppError> {
        if start >= end || end > self.len() {
            return Err(AppError::data(format!(
                "Invalid trajectory slice {start}..{end} for a trajectory of {} states.",
                self.len()
            )));
        }
        Ok(Self {
            states: self.states.rows(start, end - start).into_owned(),
        })
    }

    /// First `n` states.
    pub fn head(&self, n: usize) -> Result<Self, AppError> {
        self.slice(0, n)
    }

    /// Last `n` states.
    pub fn tail(&self, n: usize) -> Result<Self, AppError> {
        if n > self.len() {
            return Err(AppError::data(format!(
                "Requested the last {n} states of a trajectory with {} states.",
                self.len()
            )));
        }
        self.slice(self.len() - n, self.len())
    }
}

/// Per-dimension affine normalization `(x - mean) / scale`.
///
/// The scale is the largest absolute deviation from the mean, so every
/// rescaled coordinate lies in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rescaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Rescaler {
    pub fn fit(trajectory: &Trajectory) -> Self {
        let states = trajectory.states();
        let n = states.nrows() as f64;
        let mut mean = Vec::with_capacity(states.ncols());
        let mut scale = Vec::with_capacity(states.ncols());

        for (j, col) in states.column_iter().enumerate() {
            let m = col.sum() / n;
            let s = col.iter().map(|v| (v - m).abs()).fold(0.0_f64, f64::max);
            mean.push(m);
            if s > 0.0 {
                scale.push(s);
            } else {
                tracing::warn!(dimension = j, "constant trajectory dimension; using scale 1");
                scale.push(1.0);
            }
        }

        Self { mean, scale }
    }

    pub fn transform(&self, trajectory: &Trajectory) -> Result<Trajectory, AppError> {
        self.check_dim(trajectory)?;
        let mut out = trajectory.states().clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            col.apply(|v| *v = (*v - self.mean[j]) / self.scale[j]);
        }
        Trajectory::new(out)
    }

    pub fn inverse(&self, trajectory: &Trajectory) -> Result<Trajectory, AppError> {
        self.check_dim(trajectory)?;
        let mut out = trajectory.states().clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            col.apply(|v| *v = *v * self.scale[j] + self.mean[j]);
        }
        Trajectory::new(out)
    }

    fn check_dim(&self, trajectory: &Trajectory) -> Result<(), AppError> {
        if trajectory.dim() != self.mean.len() {
            return Err(AppError::input(format!(
                "Rescaler was fitted on dimension {}, got {}.",
                self.mean.len(),
                trajectory.dim()
            )));
        }
        Ok(())
    }
}

/// Fit a [`Rescaler`] on `trajectory` and apply it.
pub fn rescale(trajectory: &Trajectory) -> Result<(Trajectory, Rescaler), AppError> {
    let rescaler = Rescaler::fit(trajectory);
    let scaled = rescaler.transform(trajectory)?;
    Ok((scaled, rescaler))
}
