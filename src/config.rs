//! Configuration structures for the lesion trainer.
//!
//! Every section has defaults reproducing the reference HAM10000 run, so a
//! TOML file only needs to name what differs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::DeviceKind;
use crate::dataset::augmentation::AugmentationConfig;
use crate::utils::error::{LesionError, Result};

/// Default metadata file name inside the data directory
pub const DEFAULT_METADATA_FILE: &str = "HAM10000_metadata.csv";

/// Main configuration for a training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training hyperparameters
    pub training: TrainingParams,
    /// Device configuration
    pub device: DeviceConfig,
    /// Train-time augmentation
    pub augmentation: AugmentationConfig,
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the images (searched recursively)
    pub data_dir: PathBuf,
    /// Metadata CSV; defaults to `<data_dir>/HAM10000_metadata.csv`
    pub metadata_file: Option<PathBuf>,
    /// Where checkpoints, stats and history are written
    pub output_dir: PathBuf,
    /// Fraction of the corpus held out for validation
    pub val_fraction: f64,
    /// Seed for the stratified split
    pub split_seed: u64,
    /// Oversampling factor per diagnosis code; 0 or missing means unchanged
    pub balance_factors: BTreeMap<String, usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        let balance_factors = [
            ("akiec", 15),
            ("bcc", 10),
            ("bkl", 5),
            ("df", 50),
            ("nv", 0),
            ("vasc", 40),
            ("mel", 5),
        ]
        .into_iter()
        .map(|(code, factor)| (code.to_string(), factor))
        .collect();

        Self {
            data_dir: PathBuf::from("data"),
            metadata_file: None,
            output_dir: PathBuf::from("output"),
            val_fraction: 0.2,
            split_seed: 101,
            balance_factors,
        }
    }
}

impl DataConfig {
    /// Resolved path of the metadata CSV
    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_METADATA_FILE))
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Architecture id looked up in the model registry
    pub architecture: String,
    /// Overrides the architecture's native input size
    pub input_size: Option<usize>,
    /// Burn record holding pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
    /// Output width of the pretrained head before the swap
    pub pretrained_classes: usize,
    /// Freeze the backbone and train only the new head
    pub feature_extract: bool,
    /// Dropout before the classifier head
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: "densenet".to_string(),
            input_size: None,
            pretrained_weights: None,
            pretrained_classes: 1000,
            feature_extract: false,
            dropout: 0.0,
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of training epochs
    pub num_epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// L2 penalty, disabled when zero
    pub weight_decay: f32,
    /// Number of decode workers for data loading
    pub num_workers: usize,
    /// Ready batches buffered ahead of the training thread
    pub prefetch_batches: usize,
    /// Seed for per-epoch shuffling, augmentation and weight init
    pub shuffle_seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            num_workers: 16,
            prefetch_batches: 4,
            shuffle_seed: 10,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Requested device
    pub device: DeviceKind,
    /// Train entirely in f16 (only honoured on CUDA).
    ///
    /// Off by default: the f16 backend keeps weights and optimizer state in
    /// half precision too, which is not the autocast scheme of an f32 run.
    pub mixed_precision: bool,
}

impl TrainingConfig {
    /// Load a config file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(LesionError::Config("batch_size must be positive".into()));
        }
        if t.num_epochs == 0 {
            return Err(LesionError::Config("num_epochs must be positive".into()));
        }
        if !(t.learning_rate > 0.0) {
            return Err(LesionError::Config(format!(
                "learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }
        if t.weight_decay < 0.0 {
            return Err(LesionError::Config("weight_decay must not be negative".into()));
        }
        let f = self.data.val_fraction;
        if !(f > 0.0 && f < 1.0) {
            return Err(LesionError::Config(format!(
                "val_fraction must lie in (0, 1), got {}",
                f
            )));
        }
        if let Some(size) = self.model.input_size {
            if size < 32 {
                return Err(LesionError::Config(format!(
                    "input_size {} is too small (minimum 32)",
                    size
                )));
            }
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(LesionError::Config("dropout must lie in [0, 1)".into()));
        }
        self.augmentation.validate()
    }

    /// Write the effective configuration next to the outputs
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LesionError::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Load a TOML config file into any deserializable type
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        LesionError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        LesionError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })
}
