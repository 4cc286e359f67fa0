//! Optimizers over flat parameter vectors.
//!
//! - SGD with optional momentum
//! - Adam (Adaptive Moment Estimation)
//!
//! Optimizer state (moments, step count) is serializable so that training can
//! resume from a checkpoint without changing the trajectory of the weights.

use clap::ValueEnum;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    #[default]
    Adam,
}

/// A descent step on `params` given the gradient of the loss.
pub trait Optimizer {
    fn step(&mut self, params: &mut DVector<f64>, grad: &DVector<f64>) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    velocity: Option<DVector<f64>>,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            velocity: None,
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut DVector<f64>, grad: &DVector<f64>) -> Result<(), AppError> {
        check_shapes(params, grad)?;
        if self.momentum > 0.0 {
            let v = self.velocity.get_or_insert_with(|| DVector::zeros(params.len()));
            *v = &*v * self.momentum - grad * self.learning_rate;
            *params += &*v;
        } else {
            params.axpy(-self.learning_rate, grad, 1.0);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    t: u64,
    m: Option<DVector<f64>>,
    v: Option<DVector<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: None,
            v: None,
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut DVector<f64>, grad: &DVector<f64>) -> Result<(), AppError> {
        check_shapes(params, grad)?;
        self.t += 1;
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);

        let m = self.m.get_or_insert_with(|| DVector::zeros(params.len()));
        *m = &*m * self.beta1 + grad * (1.0 - self.beta1);
        let v = self.v.get_or_insert_with(|| DVector::zeros(params.len()));
        *v = &*v * self.beta2 + grad.component_mul(grad) * (1.0 - self.beta2);

        let m_scale = 1.0 / (1.0 - self.beta1.powi(t));
        let v_scale = 1.0 / (1.0 - self.beta2.powi(t));
        for ((p, &mi), &vi) in params.iter_mut().zip(m.iter()).zip(v.iter()) {
            *p -= self.learning_rate * mi * m_scale / ((vi * v_scale).sqrt() + self.epsilon);
        }
        Ok(())
    }
}

/// Serializable optimizer of either kind, as stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OptimizerState {
    Sgd(Sgd),
    Adam(Adam),
}

impl OptimizerState {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> Self {
        match kind {
            OptimizerKind::Sgd => OptimizerState::Sgd(Sgd::new(learning_rate)),
            OptimizerKind::Adam => OptimizerState::Adam(Adam::new(learning_rate)),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerState::Sgd(_) => OptimizerKind::Sgd,
            OptimizerState::Adam(_) => OptimizerKind::Adam,
        }
    }
}

impl Optimizer for OptimizerState {
    fn step(&mut self, params: &mut DVector<f64>, grad: &DVector<f64>) -> Result<(), AppError> {
        match self {
            OptimizerState::Sgd(o) => o.step(params, grad),
            OptimizerState::Adam(o) => o.step(params, grad),
        }
    }
}

fn check_shapes(params: &DVector<f64>, grad: &DVector<f64>) -> Result<(), AppError> {
    if params.len() != grad.len() {
        return Err(AppError::numeric(format!(
            "Gradient has {} entries for {} parameters.",
            grad.len(),
            params.len()
        )));
    }
    if !grad.iter().all(|g| g.is_finite()) {
        return Err(AppError::numeric("Non-finite gradient."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgd_steps_against_the_gradient() {
        let mut opt = Sgd::new(0.01);
        let mut w = DVector::from_element(3, 1.0);
        opt.step(&mut w, &DVector::from_element(3, 1.0)).unwrap();
        assert!((w[0] - 0.99).abs() < 1e-12);
    }

    #[test]
    fn momentum_accumulates() {
        let mut opt = Sgd::new(0.1).with_momentum(0.5);
        let mut w = DVector::from_element(1, 0.0);
        let g = DVector::from_element(1, 1.0);
        opt.step(&mut w, &g).unwrap();
        opt.step(&mut w, &g).unwrap();
        // -0.1, then -0.05 - 0.1
        assert!((w[0] + 0.25).abs() < 1e-12);
    }

    #[test]
    fn adam_first_step_has_learning_rate_size() {
        let mut opt = Adam::new(0.001);
        let mut w = DVector::from_vec(vec![1.0, -2.0]);
        opt.step(&mut w, &DVector::from_vec(vec![3.0, -0.5])).unwrap();
        assert!((w[0] - (1.0 - 0.001)).abs() < 1e-8);
        assert!((w[1] - (-2.0 + 0.001)).abs() < 1e-8);
        assert_eq!(opt.steps_taken(), 1);
    }

    #[test]
    fn adam_minimizes_a_quadratic() {
        let mut opt = OptimizerState::new(OptimizerKind::Adam, 0.01);
        let mut w = DVector::from_vec(vec![2.0, -3.0]);
        for _ in 0..3000 {
            let grad = &w * 2.0;
            opt.step(&mut w, &grad).unwrap();
        }
        assert!(w.norm() < 0.1);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut opt = OptimizerState::new(OptimizerKind::Adam, 0.01);
        let mut w = DVector::from_vec(vec![0.3, 0.7]);
        opt.step(&mut w, &DVector::from_vec(vec![0.1, -0.2])).unwrap();
        let json = serde_json::to_string(&opt).unwrap();
        let back: OptimizerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opt);
        assert_eq!(back.kind(), OptimizerKind::Adam);
    }

    #[test]
    fn mismatched_or_non_finite_gradients_fail() {
        let mut opt = Sgd::new(0.1);
        let mut w = DVector::zeros(2);
        assert!(opt.step(&mut w, &DVector::zeros(3)).is_err());
        assert!(opt.step(&mut w, &DVector::from_element(2, f64::NAN)).is_err());
    }
}
