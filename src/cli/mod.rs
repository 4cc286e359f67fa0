//! Command-line parsing for the Koopman benchmark and VAMPNet harnesses.
//!
//! Argument parsing and command dispatch stay separate from the numerical
//! code. Every flag that mirrors a config field overrides it when given.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::SystemKind;
use crate::nn::OptimizerKind;
use crate::plot::Metric;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "koop", version, about = "Koopman operator estimator benchmarks and VAMPNet training")]
pub struct Cli {
    /// Default log level when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every configured estimator over a training-size sweep.
    Sweep(SweepArgs),
    /// Train a VAMPNet encoder on ordered MNIST.
    Vampnet(VampnetArgs),
    /// Print terminal plots (and optionally SVGs) of a saved sweep.
    Plot(PlotArgs),
    /// Browse a saved sweep in an interactive terminal UI.
    Tui(TuiArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ConfigArg {
    /// TOML config file (defaults to ./koop.toml when present).
    #[arg(short = 'c', long, value_name = "TOML")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Dynamical system generating the trajectory.
    #[arg(long, value_enum)]
    pub system: Option<SystemKind>,

    /// Read the trajectory from a CSV file instead.
    #[arg(long, value_name = "CSV")]
    pub trajectory: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub rank: Option<usize>,

    /// Largest training size of the sweep.
    #[arg(long)]
    pub size_max: Option<usize>,

    /// Number of geometric steps between the smallest and largest size.
    #[arg(long)]
    pub size_steps: Option<usize>,

    /// Results JSON read by `koop plot` and `koop tui`.
    #[arg(short = 'o', long, value_name = "JSON", default_value = "koop-results.json")]
    pub out: PathBuf,

    /// Also write the metrics as CSV.
    #[arg(long, value_name = "CSV")]
    pub csv: Option<PathBuf>,

    /// Write SVG figures into this directory.
    #[arg(long, value_name = "DIR")]
    pub svg_dir: Option<PathBuf>,

    /// Save the estimators fitted at the largest size as JSON into this directory.
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Write the (unscaled) trajectory the sweep ran on as CSV.
    #[arg(long, value_name = "CSV")]
    pub trajectory_out: Option<PathBuf>,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Args, Clone)]
pub struct VampnetArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Directory with the raw MNIST IDX files.
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Train on generated glyphs instead of MNIST.
    #[arg(long)]
    pub synthetic: bool,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerKind>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Continue from a checkpoint written by an earlier run.
    #[arg(long, value_name = "JSON")]
    pub resume: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Write the per-epoch history as CSV.
    #[arg(long, value_name = "CSV")]
    pub history_csv: Option<PathBuf>,

    /// Write the final encoder as JSON.
    #[arg(long, value_name = "JSON")]
    pub encoder_out: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PlotArgs {
    /// Results JSON produced by `koop sweep`.
    #[arg(long, value_name = "JSON", default_value = "koop-results.json")]
    pub results: PathBuf,

    /// Only this metric (all by default).
    #[arg(long, value_enum)]
    pub metric: Option<Metric>,

    /// Also plot the eigenvalues of this estimator.
    #[arg(long, value_name = "NAME")]
    pub spectrum: Option<String>,

    /// Write SVG figures into this directory.
    #[arg(long, value_name = "DIR")]
    pub svg_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 80)]
    pub width: usize,

    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Args, Clone)]
pub struct TuiArgs {
    /// Results JSON produced by `koop sweep`.
    #[arg(long, value_name = "JSON", default_value = "koop-results.json")]
    pub results: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_flags_parse() {
        let cli = Cli::parse_from([
            "koop", "sweep", "--system", "mock", "--rank", "5", "--csv", "m.csv", "--no-plot",
        ]);
        let Command::Sweep(args) = cli.command else {
            panic!("expected sweep");
        };
        assert_eq!(args.system, Some(SystemKind::Mock));
        assert_eq!(args.rank, Some(5));
        assert_eq!(args.out, PathBuf::from("koop-results.json"));
        assert!(args.no_plot);
        assert_eq!(cli.log_level, tracing::Level::INFO);
    }

    #[test]
    fn vampnet_flags_parse() {
        let cli = Cli::parse_from([
            "koop", "--log-level", "debug", "vampnet", "--synthetic", "--optimizer", "sgd", "--epochs", "3",
        ]);
        let Command::Vampnet(args) = cli.command else {
            panic!("expected vampnet");
        };
        assert!(args.synthetic);
        assert_eq!(args.optimizer, Some(OptimizerKind::Sgd));
        assert_eq!(args.epochs, Some(3));
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn plot_metric_is_kebab_case() {
        let cli = Cli::parse_from(["koop", "plot", "--metric", "fit-time"]);
        let Command::Plot(args) = cli.command else {
            panic!("expected plot");
        };
        assert_eq!(args.metric, Some(Metric::FitTime));
    }
}
