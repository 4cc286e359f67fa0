//! Domain types used throughout the pipelines.
//!
//! This module defines:
//!
//! - sweep configuration pieces (`SystemKind`, `EstimatorSpec`, `BenchEstimator`)
//! - sweep outputs (`SweepPoint`, `EstimatorSeries`, `SweepResults`)
//! - training outputs (`EpochMetrics`, `TrainingHistory`)

pub mod types;

pub use types::*;
