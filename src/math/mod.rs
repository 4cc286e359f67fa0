//! Mathematical utilities: dense linear algebra helpers, least squares,
//! geometric grids and error statistics.

pub mod grid;
pub mod linalg;
pub mod ols;
pub mod stats;

pub use grid::*;
pub use linalg::*;
pub use ols::*;
pub use stats::*;
