//! Data Augmentation Module for Skin Lesion Classification
//!
//! Train-time transforms applied on every access:
//! resize, random flips, random rotation, color jitter, then conversion to
//! a normalized CHW float buffer. Validation only resizes and normalizes.
//!
//! Randomness comes from a caller-supplied `ChaCha8Rng`, so a given seed
//! reproduces the exact same augmented image.

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::stats::ChannelStats;
use crate::utils::error::{LesionError, Result};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f32,
    /// Probability of a vertical flip
    pub vertical_flip_prob: f32,
    /// Rotation angle drawn uniformly from ±rotation_degrees
    pub rotation_degrees: f32,
    /// Brightness factor drawn from 1.0 ± brightness
    pub brightness: f32,
    /// Contrast factor drawn from 1.0 ± contrast
    pub contrast: f32,
    /// Hue shift drawn from ±hue, in turns
    pub hue: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            rotation_degrees: 20.0,
            brightness: 0.1,
            contrast: 0.1,
            hue: 0.1,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            rotation_degrees: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            hue: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let prob_ok = |p: f32| (0.0..=1.0).contains(&p);
        if !prob_ok(self.horizontal_flip_prob) || !prob_ok(self.vertical_flip_prob) {
            return Err(LesionError::Config(
                "flip probabilities must lie in [0, 1]".into(),
            ));
        }
        if !(0.0..=180.0).contains(&self.rotation_degrees) {
            return Err(LesionError::Config(
                "rotation_degrees must lie in [0, 180]".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.brightness) || !(0.0..1.0).contains(&self.contrast) {
            return Err(LesionError::Config(
                "brightness and contrast jitter must lie in [0, 1)".into(),
            ));
        }
        if !(0.0..=0.5).contains(&self.hue) {
            return Err(LesionError::Config("hue jitter must lie in [0, 0.5]".into()));
        }
        Ok(())
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Resize to the square network input (always applied, not random)
    pub fn resize(&self, img: &DynamicImage) -> RgbImage {
        img.resize_exact(self.image_size, self.image_size, FilterType::Triangle)
            .to_rgb8()
    }

    /// Apply flips, rotation and color jitter in that order
    pub fn augment(&self, mut img: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let c = &self.config;

        if rng.gen::<f32>() < c.horizontal_flip_prob {
            image::imageops::flip_horizontal_in_place(&mut img);
        }
        if rng.gen::<f32>() < c.vertical_flip_prob {
            image::imageops::flip_vertical_in_place(&mut img);
        }

        if c.rotation_degrees > 0.0 {
            let angle = rng.gen_range(-c.rotation_degrees..=c.rotation_degrees);
            img = rotate(&img, angle);
        }

        if c.brightness > 0.0 {
            let factor = rng.gen_range(1.0 - c.brightness..=1.0 + c.brightness);
            adjust_brightness(&mut img, factor);
        }
        if c.contrast > 0.0 {
            let factor = rng.gen_range(1.0 - c.contrast..=1.0 + c.contrast);
            adjust_contrast(&mut img, factor);
        }
        if c.hue > 0.0 {
            let shift = rng.gen_range(-c.hue..=c.hue);
            shift_hue(&mut img, shift);
        }

        img
    }

    /// Convert to a CHW buffer scaled to [0, 1] and normalized per channel
    pub fn to_normalized_chw(&self, img: &RgbImage, stats: &ChannelStats) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in img.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = stats.normalize(pixel[c] as f32 / 255.0, c);
            }
        }
        data
    }
}

/// Rotate around the center with bilinear sampling; uncovered corners are black
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 1e-3 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;
        bilinear_sample(img, src_x, src_y)
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn adjust_brightness(img: &mut RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blend with the mean grayscale level of the image
fn adjust_contrast(img: &mut RgbImage, factor: f32) {
    let count = img.pixels().len().max(1) as f64;
    let mean = (img
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum::<f64>()
        / count) as f32;

    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = mean + factor * (pixel[c] as f32 - mean);
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Rotate hue by `shift` turns in HSV space
fn shift_hue(img: &mut RgbImage, shift: f32) {
    for pixel in img.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
        let h = (h + shift).rem_euclid(1.0);
        *pixel = Rgb(hsv_to_rgb(h, s, v));
    }
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let h6 = h * 6.0;
    let sector = h6.floor() as i32 % 6;
    let f = h6 - h6.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [r, g, b].map(|x| (x * 255.0).round().clamp(0.0, 255.0) as u8)
}
