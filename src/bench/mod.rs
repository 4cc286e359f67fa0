//! Benchmark harness: scenario construction and the training-size sweep.

pub mod scenario;
pub mod sweep;

pub use scenario::{Scenario, build_scenario, split_windows};
pub use sweep::{SweepOutput, run_sweep};
