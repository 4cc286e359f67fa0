//! Dynamical systems used to generate benchmark trajectories.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::Trajectory;
use crate::error::AppError;

/// A system that can produce a trajectory from an initial condition.
pub trait DynamicalSystem {
    fn dim(&self) -> usize;

    /// Exactly `n_points` states, the first one being `x0`.
    fn sample(&self, x0: &[f64], n_points: usize) -> Result<Trajectory, AppError>;
}

/// The Lorenz-63 attractor, integrated with classical RK4.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lorenz63 {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
    /// Time between two recorded states.
    pub dt: f64,
    /// RK4 steps per recorded state.
    pub substeps: usize,
}

impl Default for Lorenz63 {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
            dt: 0.01,
            substeps: 10,
        }
    }
}

impl Lorenz63 {
    fn vector_field(&self, x: [f64; 3]) -> [f64; 3] {
        [
            self.sigma * (x[1] - x[0]),
            x[0] * (self.rho - x[2]) - x[1],
            x[0] * x[1] - self.beta * x[2],
        ]
    }

    fn rk4_step(&self, x: [f64; 3], h: f64) -> [f64; 3] {
        let axpy = |a: [f64; 3], k: [f64; 3], s: f64| [a[0] + s * k[0], a[1] + s * k[1], a[2] + s * k[2]];

        let k1 = self.vector_field(x);
        let k2 = self.vector_field(axpy(x, k1, h / 2.0));
        let k3 = self.vector_field(axpy(x, k2, h / 2.0));
        let k4 = self.vector_field(axpy(x, k3, h));

        let mut out = x;
        for i in 0..3 {
            out[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        out
    }
}

impl DynamicalSystem for Lorenz63 {
    fn dim(&self) -> usize {
        3
    }

    fn sample(&self, x0: &[f64], n_points: usize) -> Result<Trajectory, AppError> {
        let &[a, b, c] = x0 else {
            return Err(AppError::input(format!(
                "Lorenz-63 initial condition must have 3 components, got {}.",
                x0.len()
            )));
        };
        if n_points == 0 {
            return Err(AppError::input("Number of trajectory points must be > 0."));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) || self.substeps == 0 {
            return Err(AppError::input("Lorenz-63 needs dt > 0 and at least one substep."));
        }

        let h = self.dt / self.substeps as f64;
        let mut x = [a, b, c];
        let mut flat = Vec::with_capacity(n_points * 3);
        flat.extend_from_slice(&x);

        for _ in 1..n_points {
            for _ in 0..self.substeps {
                x = self.rk4_step(x, h);
            }
            if x.iter().any(|v| !v.is_finite()) {
                return Err(AppError::numeric("Lorenz-63 integration diverged."));
            }
            flat.extend_from_slice(&x);
        }

        Trajectory::new(DMatrix::from_row_slice(n_points, 3, &flat))
    }
}

/// I.i.d. uniform states in `[0, 1)`; useful for smoke tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MockSystem {
    pub dim: usize,
    pub seed: u64,
}

impl DynamicalSystem for MockSystem {
    fn dim(&self) -> usize {
        self.dim
    }

    fn sample(&self, x0: &[f64], n_points: usize) -> Result<Trajectory, AppError> {
        if x0.len() != self.dim {
            return Err(AppError::input(format!(
                "Initial condition must have {} components, got {}.",
                self.dim,
                x0.len()
            )));
        }
        if n_points == 0 {
            return Err(AppError::input("Number of trajectory points must be > 0."));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut flat = Vec::with_capacity(n_points * self.dim);
        flat.extend_from_slice(x0);
        for _ in 1..n_points {
            for _ in 0..self.dim {
                flat.push(rng.r#gen::<f64>());
            }
        }
        Trajectory::new(DMatrix::from_row_slice(n_points, self.dim, &flat))
    }
}
