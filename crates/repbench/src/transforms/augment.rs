//! # Augmentation Primitives
//!
//! Pixel-level operations over [`RgbImage`] buffers; the composed view
//! pipelines live in the parent module.

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::Rng;

/// Randomly crop a region covering `scale` of the source area with a
/// jittered aspect ratio, then resize it to ``out_size``.
///
/// Falls back to a center crop when ten sampling attempts fail to fit.
pub fn random_resized_crop<R: Rng>(
    img: &RgbImage,
    out_size: u32,
    scale: (f64, f64),
    rng: &mut R,
) -> RgbImage {
    let (width, height) = img.dimensions();
    let area = (width * height) as f64;

    for _ in 0..10 {
        let target_area = area * rng.random_range(scale.0..=scale.1);
        let log_ratio = (3.0f64 / 4.0).ln()..=(4.0f64 / 3.0).ln();
        let aspect = rng.random_range(log_ratio).exp();

        let crop_w = (target_area * aspect).sqrt().round() as u32;
        let crop_h = (target_area / aspect).sqrt().round() as u32;

        if crop_w > 0 && crop_h > 0 && crop_w <= width && crop_h <= height {
            let x = rng.random_range(0..=width - crop_w);
            let y = rng.random_range(0..=height - crop_h);
            let cropped = imageops::crop_imm(img, x, y, crop_w, crop_h).to_image();
            return imageops::resize(&cropped, out_size, out_size, FilterType::Triangle);
        }
    }

    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    let cropped = imageops::crop_imm(img, x, y, side, side).to_image();
    imageops::resize(&cropped, out_size, out_size, FilterType::Triangle)
}

/// Mirror the image left-to-right.
pub fn horizontal_flip(img: &RgbImage) -> RgbImage {
    imageops::flip_horizontal(img)
}

/// Color jitter strengths.
///
/// Each factor is sampled uniformly in ``[1 - x, 1 + x]`` (hue in
/// ``[-hue, hue]`` turns).
#[derive(Debug, Clone, Copy)]
pub struct JitterStrength {
    /// Brightness jitter.
    pub brightness: f64,

    /// Contrast jitter.
    pub contrast: f64,

    /// Saturation jitter.
    pub saturation: f64,

    /// Hue jitter, as a fraction of a full turn.
    pub hue: f64,
}

impl JitterStrength {
    /// The SimCLR strength-1.0 recipe.
    pub fn simclr() -> Self {
        Self {
            brightness: 0.8,
            contrast: 0.8,
            saturation: 0.8,
            hue: 0.2,
        }
    }
}

fn lerp_u8(
    value: f32,
    anchor: f32,
    factor: f32,
) -> f32 {
    anchor + (value - anchor) * factor
}

/// Apply brightness/contrast/saturation/hue jitter with factors drawn
/// from `strength`.
pub fn color_jitter<R: Rng>(
    img: &RgbImage,
    strength: &JitterStrength,
    rng: &mut R,
) -> RgbImage {
    let sample = |rng: &mut R, x: f64| -> f32 {
        if x <= 0.0 {
            1.0
        } else {
            rng.random_range((1.0 - x).max(0.0)..=1.0 + x) as f32
        }
    };

    let brightness = sample(rng, strength.brightness);
    let contrast = sample(rng, strength.contrast);
    let saturation = sample(rng, strength.saturation);
    let hue_shift = if strength.hue <= 0.0 {
        0.0
    } else {
        rng.random_range(-strength.hue..=strength.hue) as f32 * 360.0
    };

    // Contrast pivots on the mean luma of the whole image.
    let mut luma_sum = 0.0f64;
    for px in img.pixels() {
        luma_sum += luma(px.0) as f64;
    }
    let mean_luma = (luma_sum / (img.width() as f64 * img.height() as f64)) as f32;

    let mut out = img.clone();
    for px in out.pixels_mut() {
        let [r, g, b] = px.0;
        let (mut r, mut g, mut b) = (r as f32, g as f32, b as f32);

        r *= brightness;
        g *= brightness;
        b *= brightness;

        r = lerp_u8(r, mean_luma, contrast);
        g = lerp_u8(g, mean_luma, contrast);
        b = lerp_u8(b, mean_luma, contrast);

        let gray = luma([r as u8, g as u8, b as u8]);
        r = lerp_u8(r, gray, saturation);
        g = lerp_u8(g, gray, saturation);
        b = lerp_u8(b, gray, saturation);

        if hue_shift != 0.0 {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let h = (h + hue_shift).rem_euclid(360.0);
            (r, g, b) = hsv_to_rgb(h, s, v);
        }

        px.0 = [clamp_u8(r), clamp_u8(g), clamp_u8(b)];
    }
    out
}

/// Replace each pixel with its luma.
pub fn grayscale(img: &RgbImage) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let g = clamp_u8(luma(px.0));
        px.0 = [g, g, g];
    }
    out
}

/// Gaussian blur with the given sigma.
pub fn gaussian_blur(
    img: &RgbImage,
    sigma: f32,
) -> RgbImage {
    imageops::blur(img, sigma)
}

/// Invert every channel value at or above `threshold`.
pub fn solarize(
    img: &RgbImage,
    threshold: u8,
) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in px.0.iter_mut() {
            if *c >= threshold {
                *c = 255 - *c;
            }
        }
    }
    out
}

/// Resize so the smaller edge equals `size`, preserving aspect.
pub fn resize_smaller_edge(
    img: &RgbImage,
    size: u32,
) -> RgbImage {
    let (width, height) = img.dimensions();
    let (new_w, new_h) = if width <= height {
        (size, (height as f64 * size as f64 / width as f64).round() as u32)
    } else {
        ((width as f64 * size as f64 / height as f64).round() as u32, size)
    };
    imageops::resize(img, new_w.max(1), new_h.max(1), FilterType::Triangle)
}

/// Crop a centered `size` x `size` square.
///
/// Upscales first if the image is smaller than the crop.
pub fn center_crop(
    img: &RgbImage,
    size: u32,
) -> RgbImage {
    let img = if img.width() < size || img.height() < size {
        resize_smaller_edge(img, size)
    } else {
        img.clone()
    };
    let x = (img.width() - size) / 2;
    let y = (img.height() - size) / 2;
    imageops::crop_imm(&img, x, y, size, size).to_image()
}

fn luma(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn rgb_to_hsv(
    r: f32,
    g: f32,
    b: f32,
) -> (f32, f32, f32) {
    let (r, g, b) = (r / 255.0, g / 255.0, b / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(
    h: f32,
    s: f32,
    v: f32,
) -> (f32, f32, f32) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    ((r + m) * 255.0, (g + m) * 255.0, (b + m) * 255.0)
}
