//! Architecture registry
//!
//! Maps an architecture id to a factory. Building a model always goes
//! through the same steps: construct the backbone with its pretrained head
//! width, load pretrained weights if configured, optionally freeze the
//! backbone, then swap in a fresh head sized for the dataset.
//!
//! A factory returns a [`LesionClassifier`], so registering an id composes
//! the existing backbones under new hyperparameters (depth, growth rate,
//! native input size) without touching the training loop. A backbone with a
//! new layer structure also needs its own `LesionClassifier` variant, since
//! Burn records and autodiff dispatch over that enum.

use std::collections::BTreeMap;
use std::path::PathBuf;

use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::info;

use super::cnn::LesionCnnConfig;
use super::densenet::DenseNetConfig;
use super::{ImageClassifier, LesionClassifier, ModelRecorder};
use crate::config::ModelConfig;
use crate::utils::error::{LesionError, Result};
use crate::IMAGE_SIZE;

/// Inputs to a model factory
#[derive(Debug, Clone)]
pub struct ArchitectureConfig {
    /// Classes of the dataset being trained
    pub num_classes: usize,
    /// Head width of the pretrained network
    pub pretrained_classes: usize,
    pub pretrained_weights: Option<PathBuf>,
    pub feature_extract: bool,
    pub dropout: f64,
    /// Overrides the architecture's native input size
    pub input_size: Option<usize>,
}

impl ArchitectureConfig {
    pub fn from_model_config(config: &ModelConfig, num_classes: usize) -> Self {
        Self {
            num_classes,
            pretrained_classes: config.pretrained_classes,
            pretrained_weights: config.pretrained_weights.clone(),
            feature_extract: config.feature_extract,
            dropout: config.dropout,
            input_size: config.input_size,
        }
    }
}

/// A classifier and the square input size it expects
#[derive(Debug)]
pub struct BuiltModel<B: Backend> {
    pub model: LesionClassifier<B>,
    pub input_size: usize,
}

/// Builds the backbone with `pretrained_classes` outputs, wrapped in one of
/// the [`LesionClassifier`] variants
pub type ModelFactory<B> = fn(&ArchitectureConfig, &<B as Backend>::Device) -> BuiltModel<B>;

/// Architecture id to factory
pub struct ModelRegistry<B: Backend> {
    factories: BTreeMap<String, ModelFactory<B>>,
}

impl<B: Backend> Default for ModelRegistry<B> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl<B: Backend> ModelRegistry<B> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding `densenet` and `cnn`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("densenet", build_densenet::<B>);
        registry.register("cnn", build_cnn::<B>);
        registry
    }

    /// Add or replace an architecture
    pub fn register(&mut self, id: &str, factory: ModelFactory<B>) {
        self.factories.insert(id.to_string(), factory);
    }

    pub fn architectures(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build architecture `id` with its head swapped to `config.num_classes`
    pub fn build(
        &self,
        id: &str,
        config: &ArchitectureConfig,
        device: &B::Device,
    ) -> Result<BuiltModel<B>> {
        let factory = self.factories.get(id).ok_or_else(|| {
            LesionError::Config(format!(
                "Unknown architecture '{}' (available: {})",
                id,
                self.architectures().join(", ")
            ))
        })?;

        let BuiltModel {
            mut model,
            input_size,
        } = factory(config, device);

        if let Some(path) = &config.pretrained_weights {
            info!("Loading pretrained weights from {:?}", path);
            model = model
                .load_file(path.clone(), &ModelRecorder::new(), device)
                .map_err(|e| {
                    LesionError::Model(format!(
                        "Failed to load pretrained weights {}: {}",
                        path.display(),
                        e
                    ))
                })?;
        }

        if config.feature_extract {
            model = model.freeze_features();
        }
        let model = model.replace_head(config.num_classes, device);
        let input_size = config.input_size.unwrap_or(input_size);

        info!(
            "Built '{}' with {} output classes at input size {} ({} parameters)",
            id,
            model.num_classes(),
            input_size,
            model.num_params()
        );
        Ok(BuiltModel { model, input_size })
    }
}

fn build_densenet<B: Backend>(config: &ArchitectureConfig, device: &B::Device) -> BuiltModel<B> {
    let model = DenseNetConfig::new(config.pretrained_classes)
        .with_dropout_rate(config.dropout)
        .init(device);
    BuiltModel {
        model: LesionClassifier::DenseNet(model),
        input_size: IMAGE_SIZE,
    }
}

fn build_cnn<B: Backend>(config: &ArchitectureConfig, device: &B::Device) -> BuiltModel<B> {
    let model = LesionCnnConfig::new(config.pretrained_classes)
        .with_dropout_rate(config.dropout)
        .init(device);
    BuiltModel {
        model: LesionClassifier::Cnn(model),
        input_size: IMAGE_SIZE,
    }
}
