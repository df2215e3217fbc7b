//! Dataset module for HAM10000 skin lesion images
//!
//! This module provides:
//! - Metadata loading and image discovery
//! - Channel statistics over the raw corpus
//! - Stratified splitting and class-balancing oversampling
//! - Per-access augmentation and normalization
//! - A parallel prefetching batch loader

use std::path::Path;

use image::{DynamicImage, ImageReader};

use crate::utils::error::{LesionError, Result};

pub mod augmentation;
pub mod loader;
pub mod metadata;
pub mod sample_source;
pub mod split;
pub mod stats;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use loader::{BatchLoader, LesionBatch, LesionBatcher, LoaderConfig};
pub use metadata::{ImageRecord, MetadataTable};
pub use sample_source::{LesionItem, SampleSource, TransformMode};
pub use split::{stratified_split, ClassBalancePlan, SplitSummary};
pub use stats::{compute_channel_stats, ChannelStats};

/// Diagnosis code to human-readable lesion type
pub const LESION_TYPES: [(&str, &str); crate::NUM_CLASSES] = [
    ("nv", "Melanocytic nevi"),
    ("mel", "Melanoma"),
    ("bkl", "Benign keratosis-like lesions"),
    ("bcc", "Basal cell carcinoma"),
    ("akiec", "Actinic keratoses"),
    ("vasc", "Vascular lesions"),
    ("df", "Dermatofibroma"),
];

/// Look up the human-readable label of a diagnosis code
pub fn lesion_label(code: &str) -> Option<&'static str> {
    LESION_TYPES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Supported image extensions
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Decode an image from disk. Any failure names the offending path.
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| LesionError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| LesionError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| LesionError::ImageLoad(path.to_path_buf(), e.to_string()))
}
