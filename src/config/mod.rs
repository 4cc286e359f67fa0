//! Experiment configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) reproduces
//! the Lorenz-63 benchmark and the ordered-MNIST VAMPNet run. The CLI
//! overrides individual fields after loading; `KOOP_DATA_DIR` (also read from
//! `.env`) supplies the MNIST directory when the file does not.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::Lorenz63;
use crate::domain::{EstimatorSpec, SystemKind};
use crate::error::AppError;
use crate::kernels::Kernel;
use crate::nn::OptimizerKind;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "koop.toml";

/// Environment variable naming the MNIST IDX directory.
pub const DATA_DIR_ENV: &str = "KOOP_DATA_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub vampnet: VampnetConfig,
}

/// Benchmark harness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub system: SystemKind,
    #[serde(default = "default_initial_condition")]
    pub initial_condition: Vec<f64>,
    #[serde(default)]
    pub lorenz: Lorenz63,
    /// Read the trajectory from a CSV instead of integrating `system`.
    #[serde(default)]
    pub trajectory_csv: Option<PathBuf>,
    #[serde(default)]
    pub trajectory_columns: Option<Vec<String>>,
    /// Number of training windows.
    #[serde(default = "default_n_train")]
    pub n_train: usize,
    /// States between the training and test segments.
    #[serde(default = "default_n_val")]
    pub n_val: usize,
    /// Number of test windows.
    #[serde(default = "default_n_test")]
    pub n_test: usize,
    #[serde(default = "default_context_len")]
    pub context_len: usize,
    #[serde(default = "default_size_min")]
    pub size_min: usize,
    #[serde(default = "default_size_max")]
    pub size_max: usize,
    #[serde(default = "default_size_steps")]
    pub size_steps: usize,
    #[serde(default)]
    pub kernel: Kernel,
    #[serde(default = "default_sweep_rank")]
    pub rank: usize,
    #[serde(default = "default_tikhonov_reg")]
    pub tikhonov_reg: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "EstimatorSpec::benchmark_defaults")]
    pub estimators: Vec<EstimatorSpec>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            system: SystemKind::default(),
            initial_condition: default_initial_condition(),
            lorenz: Lorenz63::default(),
            trajectory_csv: None,
            trajectory_columns: None,
            n_train: default_n_train(),
            n_val: default_n_val(),
            n_test: default_n_test(),
            context_len: default_context_len(),
            size_min: default_size_min(),
            size_max: default_size_max(),
            size_steps: default_size_steps(),
            kernel: Kernel::default(),
            rank: default_sweep_rank(),
            tikhonov_reg: default_tikhonov_reg(),
            seed: 0,
            estimators: EstimatorSpec::benchmark_defaults(),
        }
    }
}

impl SweepConfig {
    /// Length of the generated trajectory.
    pub fn n_states(&self) -> usize {
        self.n_train + self.n_val + self.n_test
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.context_len < 2 {
            return Err(AppError::input(format!(
                "sweep.context_len must be >= 2, got {}.",
                self.context_len
            )));
        }
        if self.n_train == 0 || self.n_test == 0 {
            return Err(AppError::input("sweep.n_train and sweep.n_test must be > 0."));
        }
        if self.size_min == 0 || self.size_min > self.size_max {
            return Err(AppError::input(format!(
                "Invalid size range: size_min={} size_max={}.",
                self.size_min, self.size_max
            )));
        }
        if self.size_steps == 0 {
            return Err(AppError::input("sweep.size_steps must be > 0."));
        }
        if self.rank == 0 {
            return Err(AppError::input("sweep.rank must be >= 1."));
        }
        if !(self.tikhonov_reg.is_finite() && self.tikhonov_reg >= 0.0) {
            return Err(AppError::input(format!(
                "sweep.tikhonov_reg must be finite and >= 0, got {}.",
                self.tikhonov_reg
            )));
        }
        self.kernel.validate()?;
        if self.estimators.is_empty() {
            return Err(AppError::input("At least one estimator must be configured."));
        }
        for (i, spec) in self.estimators.iter().enumerate() {
            spec.validate()?;
            if self.estimators[..i].iter().any(|s| s.name == spec.name) {
                return Err(AppError::input(format!("Duplicate estimator name '{}'.", spec.name)));
            }
        }
        Ok(())
    }
}

/// Training harness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VampnetConfig {
    /// Directory holding the raw MNIST IDX files.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Use generated glyphs instead of MNIST.
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default = "default_classes")]
    pub classes: usize,
    #[serde(default = "default_vamp_n_train")]
    pub n_train: usize,
    #[serde(default = "default_vamp_n_val")]
    pub n_val: usize,
    #[serde(default = "default_context_len")]
    pub context_len: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Regularization of the VAMP covariances.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_tikhonov_reg")]
    pub eval_tikhonov_reg: f64,
    #[serde(default = "default_eval_every")]
    pub eval_every: usize,
    /// 0 disables checkpointing.
    #[serde(default = "default_eval_every")]
    pub checkpoint_every: usize,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default)]
    pub seed: u64,
}

impl Default for VampnetConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            synthetic: false,
            classes: default_classes(),
            n_train: default_vamp_n_train(),
            n_val: default_vamp_n_val(),
            context_len: default_context_len(),
            channels: default_channels(),
            feature_dim: default_feature_dim(),
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            optimizer: OptimizerKind::default(),
            learning_rate: default_learning_rate(),
            epsilon: default_epsilon(),
            eval_tikhonov_reg: default_tikhonov_reg(),
            eval_every: default_eval_every(),
            checkpoint_every: default_eval_every(),
            checkpoint_dir: default_checkpoint_dir(),
            seed: 0,
        }
    }
}

impl VampnetConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(2..=10).contains(&self.classes) {
            return Err(AppError::input(format!(
                "vampnet.classes must be in 2..=10, got {}.",
                self.classes
            )));
        }
        if self.context_len < 2 {
            return Err(AppError::input("vampnet.context_len must be >= 2."));
        }
        if self.n_train < self.context_len || self.n_val < self.context_len {
            return Err(AppError::input(format!(
                "vampnet.n_train and vampnet.n_val must be >= context_len ({}).",
                self.context_len
            )));
        }
        if self.channels == 0 || self.feature_dim == 0 {
            return Err(AppError::input("vampnet.channels and vampnet.feature_dim must be > 0."));
        }
        if self.batch_size < 2 {
            return Err(AppError::input("vampnet.batch_size must be >= 2."));
        }
        if self.epochs == 0 {
            return Err(AppError::input("vampnet.epochs must be > 0."));
        }
        if self.eval_every == 0 {
            return Err(AppError::input("vampnet.eval_every must be > 0."));
        }
        for (name, v) in [
            ("learning_rate", self.learning_rate),
            ("epsilon", self.epsilon),
            ("eval_tikhonov_reg", self.eval_tikhonov_reg),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(AppError::input(format!("vampnet.{name} must be finite and >= 0, got {v}.")));
            }
        }
        if !self.synthetic && self.data_dir.is_none() {
            return Err(AppError::input(format!(
                "No MNIST directory: set vampnet.data_dir, {DATA_DIR_ENV}, or use --synthetic."
            )));
        }
        Ok(())
    }
}

fn default_initial_condition() -> Vec<f64> {
    vec![1.0, 1.0, 1.0]
}

fn default_n_train() -> usize {
    10_000
}

fn default_n_val() -> usize {
    1_000
}

fn default_n_test() -> usize {
    100
}

fn default_context_len() -> usize {
    2
}

fn default_size_min() -> usize {
    100
}

fn default_size_max() -> usize {
    10_000
}

fn default_size_steps() -> usize {
    10
}

fn default_sweep_rank() -> usize {
    25
}

fn default_tikhonov_reg() -> f64 {
    1e-6
}

fn default_classes() -> usize {
    5
}

fn default_vamp_n_train() -> usize {
    1_000
}

fn default_vamp_n_val() -> usize {
    500
}

fn default_channels() -> usize {
    8
}

fn default_feature_dim() -> usize {
    5
}

fn default_batch_size() -> usize {
    64
}

fn default_epochs() -> usize {
    100
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_epsilon() -> f64 {
    1e-6
}

fn default_eval_every() -> usize {
    10
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

impl ExperimentConfig {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::new(2, format!("Failed to read config '{}': {e}", path.display())))?;
        Self::parse(&content).map_err(|e| AppError::new(2, format!("{} ('{}')", e.message(), path.display())))
    }

    pub fn parse(content: &str) -> Result<Self, AppError> {
        toml::from_str(content).map_err(|e| AppError::new(2, format!("Invalid config: {e}")))
    }

    /// Explicit path, else `koop.toml` if present, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::load(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };

        dotenvy::dotenv().ok();
        config.vampnet.data_dir = resolve_data_dir(config.vampnet.data_dir.take(), std::env::var(DATA_DIR_ENV).ok());
        Ok(config)
    }
}

/// The config value wins over the environment; empty values are ignored.
fn resolve_data_dir(configured: Option<PathBuf>, env_value: Option<String>) -> Option<PathBuf> {
    configured.or_else(|| env_value.filter(|v| !v.trim().is_empty()).map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EstimatorKind;
    use crate::nn::OptimizerKind;
    use tempfile::tempdir;

    #[test]
    fn empty_config_is_the_benchmark_default() {
        let config = ExperimentConfig::parse("").unwrap();
        assert_eq!(config, ExperimentConfig::default());
        assert_eq!(config.sweep.n_states(), 11_100);
        assert_eq!(config.sweep.estimators.len(), 3);
        assert_eq!(config.vampnet.eval_every, 10);
        config.sweep.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ExperimentConfig::parse(
            r#"
[sweep]
rank = 10
kernel = { type = "rbf", length_scale = 0.5 }

[[sweep.estimators]]
name = "Nys100"
kind = "nystroem"
n_centers = 100

[vampnet]
batch_size = 32
classes = 3
optimizer = "sgd"
synthetic = true
"#,
        )
        .unwrap();
        assert_eq!(config.sweep.rank, 10);
        assert_eq!(config.sweep.kernel, Kernel::Rbf { length_scale: 0.5 });
        assert_eq!(config.sweep.n_train, 10_000);
        assert_eq!(config.sweep.estimators.len(), 1);
        assert_eq!(config.sweep.estimators[0].kind, EstimatorKind::Nystroem);
        assert_eq!(config.vampnet.batch_size, 32);
        assert_eq!(config.vampnet.optimizer, OptimizerKind::Sgd);
        config.vampnet.validate().unwrap();
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut sweep = SweepConfig::default();
        sweep.context_len = 1;
        assert!(sweep.validate().is_err());

        let mut sweep = SweepConfig::default();
        sweep.estimators.push(EstimatorSpec::kernel_dmd("KernelDMD"));
        assert!(sweep.validate().is_err());

        let vampnet = VampnetConfig::default();
        assert!(vampnet.validate().is_err(), "no data dir and not synthetic");

        assert_eq!(ExperimentConfig::parse("[sweep]\nrank = \"x\"").unwrap_err().exit_code(), 2);
    }

    #[test]
    fn load_reads_files_and_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("koop.toml");
        std::fs::write(&path, "[vampnet]\nepochs = 3\n").unwrap();
        assert_eq!(ExperimentConfig::load(&path).unwrap().vampnet.epochs, 3);

        std::fs::write(&path, "[vampnet\n").unwrap();
        let err = ExperimentConfig::load(&path).unwrap_err();
        assert!(err.message().contains("koop.toml"));
    }

    #[test]
    fn data_dir_prefers_config_over_environment() {
        let configured = Some(PathBuf::from("/data/a"));
        assert_eq!(resolve_data_dir(configured.clone(), Some("/data/b".into())), configured);
        assert_eq!(resolve_data_dir(None, Some("/data/b".into())), Some(PathBuf::from("/data/b")));
        assert_eq!(resolve_data_dir(None, Some("  ".into())), None);
    }
}
