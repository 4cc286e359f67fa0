//! Shared pipelines behind the `sweep` and `vampnet` commands.
//!
//! Keeping the workflows here keeps them testable without the CLI:
//! scenario -> sweep -> saved models, and
//! dataset -> windows -> encoder/optimizer (fresh or resumed) -> trainer.

use std::fs;
use std::path::{Path, PathBuf};

use crate::bench::{Scenario, SweepOutput, build_scenario, run_sweep};
use crate::config::{SweepConfig, VampnetConfig};
use crate::data::{ContextBatch, OrderedMnist};
use crate::domain::BenchEstimator;
use crate::error::AppError;
use crate::io::save_estimator;
use crate::nn::{
    CheckpointCallback, ConvEncoder, EvaluationCallback, NearestCentroid, OptimizerState, Trainer, TrainerOptions,
    TrainingState, load_checkpoint,
};

/// Side of the generated glyphs, matching MNIST.
pub const SYNTHETIC_SIDE: usize = 28;

/// The scenario a sweep ran on, with its outputs.
#[derive(Debug, Clone)]
pub struct SweepRun {
    pub scenario: Scenario,
    pub output: SweepOutput,
}

/// Build the scenario and run the sweep.
pub fn run_sweep_pipeline(config: &SweepConfig) -> Result<SweepRun, AppError> {
    config.validate()?;
    let scenario = build_scenario(config)?;
    tracing::info!(
        states = scenario.trajectory.len(),
        train = scenario.train.len(),
        test = scenario.test.len(),
        "scenario ready"
    );
    let output = run_sweep(config, &scenario)?;
    Ok(SweepRun { scenario, output })
}

/// Save each fitted estimator as `<dir>/<name>.json`.
pub fn save_models(dir: &Path, fitted: &[(String, BenchEstimator)]) -> Result<Vec<PathBuf>, AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create model directory '{}': {e}", dir.display())))?;
    let mut written = Vec::with_capacity(fitted.len());
    for (name, estimator) in fitted {
        let path = dir.join(format!("{}.json", file_safe(name)));
        save_estimator(&path, estimator)?;
        written.push(path);
    }
    Ok(written)
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Ordered images split into disjoint train and validation parts.
pub fn load_dataset(config: &VampnetConfig) -> Result<(OrderedMnist, OrderedMnist), AppError> {
    let n_total = config.n_train + config.n_val;
    let data = if config.synthetic {
        OrderedMnist::synthetic(config.classes, n_total, SYNTHETIC_SIDE, config.seed)?
    } else {
        let dir = config
            .data_dir
            .as_deref()
            .ok_or_else(|| AppError::input("No MNIST directory configured."))?;
        OrderedMnist::load(dir, config.classes, n_total)?
    };
    data.split(config.n_train)
}

/// Run (or continue) VAMPNet training and return the final state.
pub fn run_vampnet(config: &VampnetConfig, resume: Option<&Path>) -> Result<TrainingState, AppError> {
    config.validate()?;
    let (train, val) = load_dataset(config)?;
    let train_windows = ContextBatch::from_trajectory(&train.trajectory()?, config.context_len)?;
    let val_windows = ContextBatch::from_trajectory(&val.trajectory()?, config.context_len)?;
    let val_labels = val.window_output_labels(config.context_len);
    let classifier = NearestCentroid::fit(train.images(), train.labels())?;
    tracing::info!(
        train_windows = train_windows.len(),
        val_windows = val_windows.len(),
        side = train.side(),
        "dataset ready"
    );

    let mut state = match resume {
        Some(path) => {
            let checkpoint = load_checkpoint(path)?;
            if checkpoint.state.encoder.side() != train.side() {
                return Err(AppError::input(format!(
                    "Checkpoint encoder expects {0}×{0} images, the dataset has {1}×{1}.",
                    checkpoint.state.encoder.side(),
                    train.side()
                )));
            }
            tracing::info!(
                epoch = checkpoint.state.epoch,
                saved_at = %checkpoint.saved_at,
                "resuming from checkpoint"
            );
            checkpoint.state
        }
        None => TrainingState::new(
            ConvEncoder::new(train.side(), config.channels, config.feature_dim, config.seed)?,
            OptimizerState::new(config.optimizer, config.learning_rate),
        ),
    };

    let evaluation = EvaluationCallback::new(
        config.eval_every,
        train_windows.clone(),
        val_windows,
        val_labels,
        classifier,
        config.eval_tikhonov_reg,
    )?;
    let mut trainer = Trainer::new(TrainerOptions {
        batch_size: config.batch_size,
        epochs: config.epochs,
        epsilon: config.epsilon,
        seed: config.seed,
    })
    .with_callback(evaluation)
    .with_callback(CheckpointCallback::new(config.checkpoint_every, &config.checkpoint_dir));

    trainer.fit(&mut state, &train_windows)?;
    Ok(state)
}
