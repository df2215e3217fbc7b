//! Best-model checkpointing
//!
//! A single checkpoint lives at a fixed path: the Burn record
//! `best_model.mpk` plus the JSON sidecar `best_model.json`. Both are written
//! to a temporary name first and renamed over the previous files, so a crash
//! never leaves a half-written checkpoint behind. Parameters are recorded at
//! full precision, so a reload reproduces the logits that earned the stored
//! validation accuracy.

use std::fs;
use std::path::PathBuf;

use burn::module::Module;
use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::stats::ChannelStats;
use crate::model::ModelRecorder;
use crate::utils::error::{LesionError, Result};

const CHECKPOINT_STEM: &str = "best_model";
const PARTIAL_SUFFIX: &str = "-partial";

/// Sidecar describing the stored model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub architecture: String,
    pub input_size: usize,
    pub class_names: Vec<String>,
    pub channel_stats: ChannelStats,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(
        epoch: usize,
        val_accuracy: f64,
        val_loss: f64,
        architecture: &str,
        input_size: usize,
        class_names: Vec<String>,
        channel_stats: ChannelStats,
    ) -> Self {
        Self {
            epoch,
            val_accuracy,
            val_loss,
            architecture: architecture.to_string(),
            input_size,
            class_names,
            channel_stats,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Keeps the best validation accuracy seen so far.
///
/// Starts below any achievable accuracy; only a strictly higher value counts
/// as an improvement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestTracker {
    best: Option<f64>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn is_improvement(&self, accuracy: f64) -> bool {
        self.best.map_or(true, |best| accuracy > best)
    }

    /// Record `accuracy`; returns whether it improved on the best
    pub fn observe(&mut self, accuracy: f64) -> bool {
        let improved = self.is_improvement(accuracy);
        if improved {
            self.best = Some(accuracy);
        }
        improved
    }
}

/// Fixed-path store for the best model
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the Burn record
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(format!("{}.mpk", CHECKPOINT_STEM))
    }

    /// Path of the JSON sidecar
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", CHECKPOINT_STEM))
    }

    pub fn exists(&self) -> bool {
        self.model_path().exists()
    }

    /// Replace the stored checkpoint with `model`
    pub fn save<B, M>(&self, model: &M, metadata: &CheckpointMetadata) -> Result<PathBuf>
    where
        B: Backend,
        M: Module<B> + Clone,
    {
        // The recorder sets the extension itself, so the stem carries the marker
        let partial_stem = self.dir.join(format!("{}{}", CHECKPOINT_STEM, PARTIAL_SUFFIX));
        model
            .clone()
            .save_file(partial_stem.clone(), &ModelRecorder::new())
            .map_err(|e| LesionError::Checkpoint(format!("Failed to record model: {}", e)))?;
        let model_path = self.model_path();
        fs::rename(partial_stem.with_extension("mpk"), &model_path)?;

        let partial_json = self.dir.join(format!("{}{}.json", CHECKPOINT_STEM, PARTIAL_SUFFIX));
        fs::write(&partial_json, serde_json::to_string_pretty(metadata)?)?;
        fs::rename(&partial_json, self.metadata_path())?;

        info!(
            "Checkpoint saved to {:?} (epoch {}, val acc {:.5})",
            model_path, metadata.epoch, metadata.val_accuracy
        );
        Ok(model_path)
    }

    pub fn load_metadata(&self) -> Result<CheckpointMetadata> {
        let path = self.metadata_path();
        let json = fs::read_to_string(&path).map_err(|e| {
            LesionError::Checkpoint(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load the stored parameters into `model`
    pub fn load<B, M>(&self, model: M, device: &B::Device) -> Result<M>
    where
        B: Backend,
        M: Module<B>,
    {
        model
            .load_file(self.model_path(), &ModelRecorder::new(), device)
            .map_err(|e| LesionError::Checkpoint(format!("Failed to load model: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_improvement_sequence() {
        let mut tracker = BestTracker::new();
        let improved: Vec<usize> = [0.5, 0.6, 0.55, 0.6, 0.7]
            .iter()
            .enumerate()
            .filter(|(_, acc)| tracker.observe(**acc))
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(improved, vec![1, 2, 5]);
        assert_eq!(tracker.best(), Some(0.7));
    }

    #[test]
    fn test_zero_accuracy_still_improves_on_nothing() {
        let mut tracker = BestTracker::new();
        assert!(tracker.observe(0.0));
        assert!(!tracker.observe(0.0));
    }

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("out")).unwrap();
        assert!(store.model_path().ends_with("best_model.mpk"));
        assert!(store.metadata_path().ends_with("best_model.json"));
        assert!(!store.exists());
        assert!(store.model_path().starts_with(dir.path().join("out")));
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_save_replaces_in_place_and_reloads() {
        use crate::model::{ImageClassifier, LesionCnnConfig, LesionClassifier};
        use burn::tensor::Tensor;
        use burn_ndarray::NdArray;

        type TestBackend = NdArray;

        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let device = Default::default();
        let stats = ChannelStats {
            mean: [0.5; 3],
            std: [0.2; 3],
        };
        let model: LesionClassifier<TestBackend> = LesionClassifier::Cnn(
            LesionCnnConfig::new(3)
                .with_base_filters(2)
                .with_hidden_size(4)
                .init(&device),
        );

        for (epoch, acc) in [(1, 0.4), (2, 0.6)] {
            let meta = CheckpointMetadata::new(
                epoch,
                acc,
                1.0,
                "cnn",
                32,
                vec!["a".into(), "b".into(), "c".into()],
                stats,
            );
            store.save(&model, &meta).unwrap();
        }

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files.len(), 2, "unexpected files: {:?}", files);
        assert_eq!(store.load_metadata().unwrap().epoch, 2);

        let fresh: LesionClassifier<TestBackend> = LesionClassifier::Cnn(
            LesionCnnConfig::new(3)
                .with_base_filters(2)
                .with_hidden_size(4)
                .init(&device),
        );
        let loaded = store.load(fresh, &device).unwrap();
        assert_eq!(loaded.num_classes(), 3);

        // Reloaded weights are the saved weights, not a rounded copy
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device) * 0.3;
        let live = model.forward(input.clone()).into_data();
        let restored = loaded.forward(input).into_data();
        live.assert_eq(&restored, true);
    }
}
