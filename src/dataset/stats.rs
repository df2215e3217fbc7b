//! Per-channel normalization statistics
//!
//! Every image is decoded, resized to a square and kept in memory as `u8`
//! (memory grows linearly with the corpus). Mean and population standard
//! deviation are then computed per RGB channel over all pixels of all
//! images, in two passes with `f64` accumulation in a fixed order, so the
//! result is bit-identical across runs on the same input.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::open_image;
use crate::utils::error::{LesionError, Result};

/// Per-channel mean and standard deviation in RGB order, on the [0, 1] scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ChannelStats {
    /// Normalize a [0, 1] value of channel `c`
    #[inline]
    pub fn normalize(&self, value: f32, c: usize) -> f32 {
        (value - self.mean[c]) / self.std[c]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let stats: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        stats.validate()?;
        Ok(stats)
    }

    /// Every channel needs a positive, finite std to be usable as a divisor
    pub fn validate(&self) -> Result<()> {
        for (c, &std) in self.std.iter().enumerate() {
            if !(std.is_finite() && std > 0.0) {
                return Err(LesionError::Config(format!(
                    "Channel {} has standard deviation {}; images without variation cannot be normalized",
                    c, std
                )));
            }
        }
        Ok(())
    }
}

/// Compute channel statistics over `paths` resized to `image_size`.
///
/// Decoding runs on the rayon pool; the reduction order is the order of
/// `paths`. An empty input or a channel with zero variance is a
/// configuration error and an unreadable image aborts the whole computation.
pub fn compute_channel_stats(paths: &[PathBuf], image_size: u32) -> Result<ChannelStats> {
    if paths.is_empty() {
        return Err(LesionError::Config(
            "Cannot compute channel statistics over zero images".into(),
        ));
    }

    info!(
        "Computing channel statistics over {} images at {}x{}",
        paths.len(),
        image_size,
        image_size
    );

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let stack: Vec<RgbImage> = paths
        .par_iter()
        .map(|path| {
            let img = open_image(path)?
                .resize_exact(image_size, image_size, FilterType::Triangle)
                .to_rgb8();
            pb.inc(1);
            Ok(img)
        })
        .collect::<Result<_>>()?;
    pb.finish_and_clear();

    let stats = stats_from_stack(&stack);
    info!(
        "Channel stats: mean = {:?}, std = {:?}",
        stats.mean, stats.std
    );
    stats.validate()?;
    Ok(stats)
}

/// Two-pass mean / population std over an in-memory stack of images
pub fn stats_from_stack(stack: &[RgbImage]) -> ChannelStats {
    let pixel_count: usize = stack.iter().map(|img| img.pixels().len()).sum();
    let n = pixel_count.max(1) as f64;

    let mut sums = [0.0f64; 3];
    for img in stack {
        for pixel in img.pixels() {
            for c in 0..3 {
                sums[c] += pixel[c] as f64 / 255.0;
            }
        }
    }
    let mean = sums.map(|s| s / n);

    let mut sq = [0.0f64; 3];
    for img in stack {
        for pixel in img.pixels() {
            for c in 0..3 {
                let d = pixel[c] as f64 / 255.0 - mean[c];
                sq[c] += d * d;
            }
        }
    }
    let std = sq.map(|s| (s / n).sqrt());

    ChannelStats {
        mean: mean.map(|m| m as f32),
        std: std.map(|s| s as f32),
    }
}
