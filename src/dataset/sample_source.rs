//! Indexed sample access with per-access transforms
//!
//! A `SampleSource` never caches decoded pixels: every `get` reads the image
//! from disk and, in train mode, draws a fresh augmentation from the
//! supplied RNG.

use std::sync::Arc;

use rand_chacha::ChaCha8Rng;

use super::augmentation::Augmenter;
use super::metadata::{ImageRecord, MetadataTable};
use super::open_image;
use super::stats::ChannelStats;
use crate::utils::error::{LesionError, Result};

/// Whether random augmentation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    Train,
    Eval,
}

/// A decoded, transformed sample
#[derive(Debug, Clone)]
pub struct LesionItem {
    /// Normalized CHW pixels, length `3 * size * size`
    pub image: Vec<f32>,
    /// Class index
    pub label: usize,
}

/// Random access over a metadata table
#[derive(Debug, Clone)]
pub struct SampleSource {
    records: Arc<[ImageRecord]>,
    augmenter: Augmenter,
    stats: Arc<ChannelStats>,
    mode: TransformMode,
}

impl SampleSource {
    pub fn new(
        table: &MetadataTable,
        augmenter: Augmenter,
        stats: Arc<ChannelStats>,
        mode: TransformMode,
    ) -> Self {
        Self {
            records: table.records.clone().into(),
            augmenter,
            stats,
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    /// Side length of the produced square images
    pub fn image_size(&self) -> usize {
        self.augmenter.image_size() as usize
    }

    /// Load and transform sample `index`.
    ///
    /// `rng` drives augmentation in train mode and is left untouched in
    /// eval mode.
    pub fn get(&self, index: usize, rng: &mut ChaCha8Rng) -> Result<LesionItem> {
        let record = self.records.get(index).ok_or_else(|| {
            LesionError::Dataset(format!(
                "Sample index {} out of range (len {})",
                index,
                self.records.len()
            ))
        })?;

        let img = open_image(&record.file_path)?;
        let mut rgb = self.augmenter.resize(&img);
        if self.mode == TransformMode::Train {
            rgb = self.augmenter.augment(rgb, rng);
        }

        Ok(LesionItem {
            image: self.augmenter.to_normalized_chw(&rgb, &self.stats),
            label: record.class_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use image::{Rgb, RgbImage};
    use rand::SeedableRng;

    fn source(dir: &std::path::Path, mode: TransformMode) -> SampleSource {
        let paths: Vec<_> = (0..3)
            .map(|i| {
                let path = dir.join(format!("ISIC_{}.png", i));
                RgbImage::from_fn(24, 24, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, i * 50]))
                    .save(&path)
                    .unwrap();
                (format!("ISIC_{}", i), "nv".to_string(), path)
            })
            .collect();
        let table = MetadataTable::from_entries(paths).unwrap();
        let stats = Arc::new(ChannelStats {
            mean: [0.5; 3],
            std: [0.25; 3],
        });
        SampleSource::new(
            &table,
            Augmenter::new(AugmentationConfig::default(), 16),
            stats,
            mode,
        )
    }

    #[test]
    fn test_eval_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), TransformMode::Eval);
        let a = src.get(1, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let b = src.get(1, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(a.image.len(), 3 * 16 * 16);
        assert_eq!(a.label, 0);
    }

    #[test]
    fn test_train_follows_rng() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), TransformMode::Train);
        let a = src.get(0, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        let b = src.get(0, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn test_out_of_range_index() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), TransformMode::Eval);
        assert_eq!(src.len(), 3);
        let err = src.get(3, &mut ChaCha8Rng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, LesionError::Dataset(_)));
    }

    #[test]
    fn test_missing_file_is_image_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), TransformMode::Eval);
        std::fs::remove_file(dir.path().join("ISIC_2.png")).unwrap();
        let err = src.get(2, &mut ChaCha8Rng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, LesionError::ImageLoad(_, _)));
    }
}
