//! Epoch callbacks: downstream evaluation and checkpointing.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::ContextBatch;
use crate::error::AppError;
use crate::estimators::{ExtendedDmd, KoopmanEstimator};
use crate::io::{load_json, save_json};
use crate::nn::{Callback, NearestCentroid, TrainingState, accuracy};

/// Every `every` epochs: fit Extended DMD on the frozen encoder, predict the
/// next image of each validation window and score the oracle's labels for
/// the predictions against the ground-truth labels of the window outputs.
pub struct EvaluationCallback {
    every: usize,
    train: ContextBatch,
    val: ContextBatch,
    val_labels: Vec<u8>,
    classifier: NearestCentroid,
    tikhonov_reg: f64,
}

impl EvaluationCallback {
    pub fn new(
        every: usize,
        train: ContextBatch,
        val: ContextBatch,
        val_labels: Vec<u8>,
        classifier: NearestCentroid,
        tikhonov_reg: f64,
    ) -> Result<Self, AppError> {
        if every == 0 {
            return Err(AppError::input("Evaluation interval must be > 0."));
        }
        if val_labels.len() != val.len() {
            return Err(AppError::data(format!(
                "{} validation windows but {} labels.",
                val.len(),
                val_labels.len()
            )));
        }
        Ok(Self {
            every,
            train,
            val,
            val_labels,
            classifier,
            tikhonov_reg,
        })
    }

    /// Accuracy of the downstream operator built on the current encoder.
    pub fn evaluate(&self, state: &TrainingState) -> Result<f64, AppError> {
        let rank = state.encoder.feature_dim();
        let mut operator = ExtendedDmd::new(&state.encoder, rank, self.tikhonov_reg);
        operator.fit(&self.train)?;
        let predicted = operator.predict(&self.val)?;
        let images = self.val.last_state(&predicted)?;
        let labels = self.classifier.predict(&images)?;
        accuracy(&labels, &self.val_labels)
    }
}

impl Callback for EvaluationCallback {
    fn on_epoch_end(&mut self, state: &mut TrainingState) -> Result<(), AppError> {
        if state.epoch % self.every != 0 {
            return Ok(());
        }
        let acc = self.evaluate(state)?;
        tracing::info!(epoch = state.epoch, accuracy = acc, "validation accuracy");
        state.history.set_accuracy(state.epoch, acc);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub saved_at: DateTime<Utc>,
    pub state: TrainingState,
}

/// Writes `checkpoint-epochNNNN.json` every `every` epochs.
pub struct CheckpointCallback {
    every: usize,
    dir: PathBuf,
}

impl CheckpointCallback {
    pub fn new(every: usize, dir: impl Into<PathBuf>) -> Self {
        Self { every, dir: dir.into() }
    }

    pub fn path_for(&self, epoch: usize) -> PathBuf {
        checkpoint_path(&self.dir, epoch)
    }
}

pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("checkpoint-epoch{epoch:04}.json"))
}

impl Callback for CheckpointCallback {
    fn on_epoch_end(&mut self, state: &mut TrainingState) -> Result<(), AppError> {
        if self.every == 0 || state.epoch % self.every != 0 {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::new(
                2,
                format!("Failed to create checkpoint directory '{}': {e}", self.dir.display()),
            )
        })?;
        let path = self.path_for(state.epoch);
        save_checkpoint(&path, state)?;
        tracing::info!(epoch = state.epoch, path = %path.display(), "checkpoint saved");
        Ok(())
    }
}

pub fn save_checkpoint(path: &Path, state: &TrainingState) -> Result<(), AppError> {
    let checkpoint = Checkpoint {
        saved_at: Utc::now(),
        state: state.clone(),
    };
    save_json(path, &checkpoint, "checkpoint")
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, AppError> {
    load_json(path, "checkpoint")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OrderedMnist;
    use crate::nn::{ConvEncoder, OptimizerKind, OptimizerState, Trainer, TrainerOptions};

    fn state(side: usize) -> TrainingState {
        TrainingState::new(
            ConvEncoder::new(side, 2, 3, 1).unwrap(),
            OptimizerState::new(OptimizerKind::Adam, 1e-2),
        )
    }

    #[test]
    fn evaluation_records_accuracy_on_schedule() {
        let data = OrderedMnist::synthetic(3, 90, 8, 2).unwrap();
        let (train, val) = data.split(60).unwrap();
        let train_batch = ContextBatch::from_trajectory(&train.trajectory().unwrap(), 2).unwrap();
        let val_batch = ContextBatch::from_trajectory(&val.trajectory().unwrap(), 2).unwrap();
        let classifier = NearestCentroid::fit(train.images(), train.labels()).unwrap();
        let eval = EvaluationCallback::new(
            2,
            train_batch.clone(),
            val_batch,
            val.window_output_labels(2),
            classifier,
            1e-6,
        )
        .unwrap();

        let options = TrainerOptions {
            batch_size: 16,
            epochs: 3,
            epsilon: 1e-4,
            seed: 0,
        };
        let mut st = state(8);
        Trainer::new(options).with_callback(eval).fit(&mut st, &train_batch).unwrap();

        let accs: Vec<Option<f64>> = st.history.epochs.iter().map(|m| m.val_accuracy).collect();
        assert!(accs[0].is_none());
        assert!(accs[2].is_none());
        let acc = accs[1].unwrap();
        assert!((0.0..=1.0).contains(&acc));
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let data = OrderedMnist::synthetic(3, 30, 8, 2).unwrap();
        let batch = ContextBatch::from_trajectory(&data.trajectory().unwrap(), 2).unwrap();
        let clf = NearestCentroid::fit(data.images(), data.labels()).unwrap();
        let err = EvaluationCallback::new(10, batch.clone(), batch, vec![0; 3], clf, 1e-6).err().unwrap();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn checkpoints_are_written_on_schedule_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt_dir = dir.path().join("ckpt");
        let mut cb = CheckpointCallback::new(2, &ckpt_dir);

        let mut st = state(9);
        st.epoch = 1;
        cb.on_epoch_end(&mut st).unwrap();
        assert!(!ckpt_dir.exists());

        st.epoch = 2;
        cb.on_epoch_end(&mut st).unwrap();
        let path = ckpt_dir.join("checkpoint-epoch0002.json");
        assert!(path.exists());

        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.state, st);
    }

    #[test]
    fn zero_interval_disables_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut cb = CheckpointCallback::new(0, dir.path().join("never"));
        let mut st = state(9);
        st.epoch = 10;
        cb.on_epoch_end(&mut st).unwrap();
        assert!(!dir.path().join("never").exists());
    }

    #[test]
    fn missing_checkpoint_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_checkpoint(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
