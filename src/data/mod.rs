//! Data sources: trajectories, context windows, dynamical systems and the
//! ordered-MNIST image sequence.

pub mod context;
pub mod lorenz;
pub mod mnist;
pub mod trajectory;

pub use context::{ContextBatch, ContextWindows, window_count};
pub use lorenz::{DynamicalSystem, Lorenz63, MockSystem};
pub use mnist::OrderedMnist;
pub use trajectory::{Rescaler, Trajectory, rescale};
