//! Input/output helpers.
//!
//! - trajectory CSV ingest + validation (`ingest`)
//! - CSV exports of metrics, history and trajectories (`export`)
//! - estimator / checkpoint JSON (`model`)
//! - sweep result JSON read/write (`results`)

pub mod export;
pub mod ingest;
pub mod model;
pub mod results;

pub use export::*;
pub use ingest::*;
pub use model::*;
pub use results::*;
