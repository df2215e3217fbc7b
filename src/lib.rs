//! # Lesion Trainer
//!
//! Supervised training of a seven-class skin-lesion classifier on the
//! HAM10000 dermatoscopy images, built on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: metadata, channel statistics, stratified split and class
//!   balancing, augmentation, and the parallel batch loader
//! - `model`: DenseNet and plain CNN backbones behind an architecture registry
//! - `training`: epoch loops, running metrics, checkpointing, the full pipeline
//! - `backend`: compile-time backends and the runtime device descriptor
//! - `config`: TOML run configuration
//! - `utils`: errors, logging, charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lesion_trainer::backend::CpuTrainingBackend;
//! use lesion_trainer::config::TrainingConfig;
//! use lesion_trainer::training::run_training;
//!
//! let config = TrainingConfig::from_file("configs/ham10000.toml".as_ref())?;
//! let report = run_training::<CpuTrainingBackend>(&config)?;
//! println!("best val acc: {:?}", report.best_accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::{DeviceCapabilities, DeviceKind};
pub use config::TrainingConfig;
pub use dataset::{BatchLoader, ChannelStats, MetadataTable, SampleSource};
pub use model::{ImageClassifier, LesionClassifier, ModelRegistry};
pub use training::{run_training, TrainingReport};
pub use utils::error::{LesionError, Result};

/// Lesion categories in HAM10000
pub const NUM_CLASSES: usize = 7;

/// Default square input resolution
pub const IMAGE_SIZE: usize = 224;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
