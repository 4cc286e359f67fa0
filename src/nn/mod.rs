//! VAMPNet training: a small convolutional encoder, the VAMP-2 objective,
//! optimizers, the epoch loop and its callbacks.

pub mod callbacks;
pub mod classifier;
pub mod encoder;
pub mod optim;
pub mod trainer;
pub mod vamp;

pub use callbacks::{Checkpoint, CheckpointCallback, EvaluationCallback, checkpoint_path, load_checkpoint, save_checkpoint};
pub use classifier::{NearestCentroid, accuracy};
pub use encoder::{ConvEncoder, ForwardCache};
pub use optim::{Adam, Optimizer, OptimizerKind, OptimizerState, Sgd};
pub use trainer::{Callback, Trainer, TrainerOptions, TrainingState};
pub use vamp::{VampGradient, vamp2_score, vamp2_with_grad};
