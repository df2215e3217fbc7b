//! Model module for skin lesion classification
//!
//! Contains the backbone architectures, the classifier wrapper the training
//! loop works with, and the registry that builds a classifier from an
//! architecture id.

pub mod cnn;
pub mod densenet;
pub mod registry;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};

pub use cnn::{LesionCnn, LesionCnnConfig};
pub use densenet::{DenseNet, DenseNetConfig};
pub use registry::{ArchitectureConfig, BuiltModel, ModelFactory, ModelRegistry};

/// Recorder for checkpoints and pretrained weights, keeping parameters at f32
pub type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// A network mapping `[N, 3, H, W]` images to `[N, C]` logits
pub trait ImageClassifier<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}

/// Classifier over any of the built-in backbones
#[derive(Module, Debug)]
pub enum LesionClassifier<B: Backend> {
    DenseNet(DenseNet<B>),
    Cnn(LesionCnn<B>),
}

impl<B: Backend> LesionClassifier<B> {
    /// Swap the classifier head for a fresh `num_classes`-way layer
    pub fn replace_head(self, num_classes: usize, device: &B::Device) -> Self {
        match self {
            LesionClassifier::DenseNet(m) => {
                LesionClassifier::DenseNet(m.replace_head(num_classes, device))
            }
            LesionClassifier::Cnn(m) => LesionClassifier::Cnn(m.replace_head(num_classes, device)),
        }
    }

    /// Freeze the backbone so only the head is trained
    pub fn freeze_features(self) -> Self {
        match self {
            LesionClassifier::DenseNet(m) => LesionClassifier::DenseNet(m.freeze_features()),
            LesionClassifier::Cnn(m) => LesionClassifier::Cnn(m.freeze_features()),
        }
    }
}

impl<B: Backend> ImageClassifier<B> for LesionClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LesionClassifier::DenseNet(m) => m.forward(images),
            LesionClassifier::Cnn(m) => m.forward(images),
        }
    }

    fn num_classes(&self) -> usize {
        match self {
            LesionClassifier::DenseNet(m) => m.num_classes(),
            LesionClassifier::Cnn(m) => m.num_classes(),
        }
    }
}
