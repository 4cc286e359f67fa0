//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - resolves the TOML config and applies CLI overrides
//! - runs the sweep or the VAMPNet training pipeline
//! - prints reports/plots and writes the requested files

use clap::Parser;

use crate::cli::{Cli, Command, PlotArgs, SweepArgs, TuiArgs, VampnetArgs};
use crate::config::{ExperimentConfig, SweepConfig, VampnetConfig};
use crate::error::AppError;
use crate::plot::Metric;

pub mod pipeline;

/// Entry point for the `koop` binary.
pub fn run() -> Result<(), AppError> {
    let argv = rewrite_args(std::env::args().collect());
    let cli = Cli::parse_from(argv);
    crate::logging::init(cli.log_level)?;

    match cli.command {
        Command::Sweep(args) => handle_sweep(args),
        Command::Vampnet(args) => handle_vampnet(args),
        Command::Plot(args) => handle_plot(args),
        Command::Tui(args) => handle_tui(args),
    }
}

fn handle_sweep(args: SweepArgs) -> Result<(), AppError> {
    let config = ExperimentConfig::resolve(args.config.config.as_deref())?;
    let sweep = sweep_config_from_args(config.sweep, &args);
    let run = pipeline::run_sweep_pipeline(&sweep)?;
    let results = &run.output.results;

    println!("{}", crate::report::format_sweep_summary(results));
    println!("{}", crate::report::format_rankings(&crate::report::rank_estimators(results)));
    if !args.no_plot {
        println!(
            "{}",
            crate::plot::render_metric_plot(results, Metric::Rmse, args.width, args.height)
        );
    }

    crate::io::write_results_json(&args.out, results)?;
    tracing::info!(path = %args.out.display(), "results written");
    if let Some(path) = &args.csv {
        crate::io::write_sweep_csv(path, results)?;
    }
    if let Some(dir) = &args.svg_dir {
        let written = crate::plot::write_sweep_figures(dir, results)?;
        tracing::info!(figures = written.len(), dir = %dir.display(), "figures written");
    }
    if let Some(dir) = &args.models_dir {
        let written = pipeline::save_models(dir, &run.output.fitted)?;
        tracing::info!(models = written.len(), dir = %dir.display(), "models written");
    }
    if let Some(path) = &args.trajectory_out {
        let raw = run.scenario.rescaler.inverse(&run.scenario.trajectory)?;
        crate::io::write_trajectory_csv(path, &raw, &run.scenario.columns)?;
    }
    Ok(())
}

fn handle_vampnet(args: VampnetArgs) -> Result<(), AppError> {
    let config = ExperimentConfig::resolve(args.config.config.as_deref())?;
    let vampnet = vampnet_config_from_args(config.vampnet, &args);
    let state = pipeline::run_vampnet(&vampnet, args.resume.as_deref())?;

    println!("{}", crate::report::format_training_summary(&state.history, &vampnet));

    if let Some(path) = &args.history_csv {
        crate::io::write_history_csv(path, &state.history)?;
    }
    if let Some(path) = &args.encoder_out {
        crate::io::save_json(path, &state.encoder, "encoder")?;
    }
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let results = crate::io::read_results_json(&args.results)?;
    let metrics: Vec<Metric> = match args.metric {
        Some(m) => vec![m],
        None => Metric::ALL.to_vec(),
    };
    for metric in metrics {
        println!(
            "{}",
            crate::plot::render_metric_plot(&results, metric, args.width, args.height)
        );
    }
    if let Some(name) = &args.spectrum {
        if results.series(name).is_none() {
            return Err(AppError::input(format!("No estimator named '{name}' in {}.", args.results.display())));
        }
        println!(
            "{}",
            crate::plot::render_spectrum_plot(&results, name, args.width, args.height)
        );
    }
    if let Some(dir) = &args.svg_dir {
        crate::plot::write_sweep_figures(dir, &results)?;
    }
    Ok(())
}

fn handle_tui(args: TuiArgs) -> Result<(), AppError> {
    crate::tui::run(&args.results)
}

pub fn sweep_config_from_args(mut config: SweepConfig, args: &SweepArgs) -> SweepConfig {
    if let Some(system) = args.system {
        config.system = system;
    }
    if let Some(path) = &args.trajectory {
        config.trajectory_csv = Some(path.clone());
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(rank) = args.rank {
        config.rank = rank;
    }
    if let Some(size_max) = args.size_max {
        config.size_max = size_max;
    }
    if let Some(steps) = args.size_steps {
        config.size_steps = steps;
    }
    config
}

pub fn vampnet_config_from_args(mut config: VampnetConfig, args: &VampnetArgs) -> VampnetConfig {
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }
    config.synthetic |= args.synthetic;
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(optimizer) = args.optimizer {
        config.optimizer = optimizer;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = lr;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(dir) = &args.checkpoint_dir {
        config.checkpoint_dir = dir.clone();
    }
    config
}

/// Rewrite argv so a bare `koop` runs the default benchmark.
///
/// Rules:
/// - `koop`                       -> `koop sweep`
/// - `koop --no-plot ...`         -> `koop sweep --no-plot ...`
/// - `koop --help/--version/-h`   -> unchanged (show top-level help/version)
/// - `koop --log-level L ...`     -> unchanged, so global flags still reach subcommands
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("sweep".to_string());
        return argv;
    };

    let is_top_level = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help" | "--log-level"
    ) || arg1.starts_with("--log-level=");
    if is_top_level {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "sweep" | "vampnet" | "plot" | "tui");
    if is_subcommand {
        return argv;
    }

    if arg1.starts_with('-') {
        argv.insert(1, "sweep".to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_runs_the_sweep() {
        assert_eq!(rewrite_args(argv(&["koop"])), argv(&["koop", "sweep"]));
        assert_eq!(
            rewrite_args(argv(&["koop", "--no-plot"])),
            argv(&["koop", "sweep", "--no-plot"])
        );
        assert_eq!(rewrite_args(argv(&["koop", "--help"])), argv(&["koop", "--help"]));
        assert_eq!(
            rewrite_args(argv(&["koop", "vampnet", "--synthetic"])),
            argv(&["koop", "vampnet", "--synthetic"])
        );
    }

    #[test]
    fn cli_flags_override_the_config() {
        let cli = Cli::parse_from(["koop", "sweep", "--rank", "7", "--size-max", "500", "--system", "mock"]);
        let Command::Sweep(args) = cli.command else {
            panic!("expected sweep");
        };
        let config = sweep_config_from_args(SweepConfig::default(), &args);
        assert_eq!(config.rank, 7);
        assert_eq!(config.size_max, 500);
        assert_eq!(config.system, crate::domain::SystemKind::Mock);
        assert_eq!(config.n_train, SweepConfig::default().n_train);

        let cli = Cli::parse_from(["koop", "vampnet", "--synthetic", "--epochs", "4", "--learning-rate", "0.01"]);
        let Command::Vampnet(args) = cli.command else {
            panic!("expected vampnet");
        };
        let config = vampnet_config_from_args(VampnetConfig::default(), &args);
        assert!(config.synthetic);
        assert_eq!(config.epochs, 4);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.batch_size, VampnetConfig::default().batch_size);
    }
}
