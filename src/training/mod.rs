//! Training module
//!
//! Epoch-level training and validation, running metrics, best-model
//! checkpointing, and the end-to-end pipeline that ties them together.

pub mod checkpoint;
pub mod criterion;
pub mod history;
pub mod meter;
pub mod run;
pub mod trainer;
pub mod validator;

pub use checkpoint::{BestTracker, CheckpointMetadata, CheckpointStore};
pub use criterion::{Criterion, CrossEntropy};
pub use history::MetricHistory;
pub use meter::RunningMetric;
pub use run::{
    compute_and_save_stats, prepare_data, run_training, EpochReport, PreparedData, RunInfo,
    TrainingLoop, TrainingReport,
};
pub use trainer::{count_correct, EpochMetrics, Trainer, LOG_INTERVAL};
pub use validator::Validator;
