//! `koop-bench` library crate.
//!
//! The binary (`koop`) is a thin wrapper around this library so that:
//!
//! - estimators, datasets and the training loop are testable without spawning processes
//! - the sweep and training pipelines share one set of numerical building blocks
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod bench;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod estimators;
pub mod io;
pub mod kernels;
pub mod logging;
pub mod math;
pub mod nn;
pub mod plot;
pub mod report;
pub mod tui;
