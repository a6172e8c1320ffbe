//! # Multi-View Augmentation Pipelines
//!
//! Each method registers a [`MultiViewTransform`] describing how many
//! augmented views a training sample produces and what each view looks
//! like; evaluation stages share one deterministic [`EvalTransform`].

pub mod augment;

use crate::transforms::augment::JitterStrength;
use burn::config::Config;
use burn::tensor::TensorData;
use image::RgbImage;
use rand::Rng;

/// ImageNet channel means.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Convert an image to normalized CHW `f32` tensor data.
pub fn to_tensor_data(img: &RgbImage) -> TensorData {
    let (width, height) = img.dimensions();
    let (width, height) = (width as usize, height as usize);

    let mut chw = vec![0.0f32; 3 * height * width];
    for (x, y, px) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            chw[c * height * width + y * width + x] =
                (px.0[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    TensorData::new(chw, [3, height, width])
}

/// One view of a training sample.
#[derive(Config, Debug)]
pub struct ViewConfig {
    /// Output resolution (square).
    pub size: usize,

    /// Lower bound of the random crop area fraction.
    #[config(default = 0.08)]
    pub crop_scale_min: f64,

    /// Upper bound of the random crop area fraction.
    #[config(default = 1.0)]
    pub crop_scale_max: f64,

    /// Horizontal flip probability.
    #[config(default = 0.5)]
    pub hflip_prob: f64,

    /// Color jitter probability.
    #[config(default = 0.8)]
    pub jitter_prob: f64,

    /// Brightness jitter strength.
    #[config(default = 0.8)]
    pub jitter_brightness: f64,

    /// Contrast jitter strength.
    #[config(default = 0.8)]
    pub jitter_contrast: f64,

    /// Saturation jitter strength.
    #[config(default = 0.8)]
    pub jitter_saturation: f64,

    /// Hue jitter strength (fraction of a turn).
    #[config(default = 0.2)]
    pub jitter_hue: f64,

    /// Random grayscale probability.
    #[config(default = 0.2)]
    pub grayscale_prob: f64,

    /// Gaussian blur probability.
    #[config(default = 0.5)]
    pub blur_prob: f64,

    /// Solarization probability.
    #[config(default = 0.0)]
    pub solarize_prob: f64,
}

impl ViewConfig {
    fn jitter_strength(&self) -> JitterStrength {
        JitterStrength {
            brightness: self.jitter_brightness,
            contrast: self.jitter_contrast,
            saturation: self.jitter_saturation,
            hue: self.jitter_hue,
        }
    }

    /// Render one augmented view.
    pub fn apply<R: Rng>(
        &self,
        img: &RgbImage,
        rng: &mut R,
    ) -> RgbImage {
        let mut out = augment::random_resized_crop(
            img,
            self.size as u32,
            (self.crop_scale_min, self.crop_scale_max),
            rng,
        );

        if rng.random_bool(self.hflip_prob) {
            out = augment::horizontal_flip(&out);
        }
        if rng.random_bool(self.jitter_prob) {
            out = augment::color_jitter(&out, &self.jitter_strength(), rng);
        }
        if rng.random_bool(self.grayscale_prob) {
            out = augment::grayscale(&out);
        }
        if rng.random_bool(self.blur_prob) {
            let sigma = rng.random_range(0.1..2.0) as f32;
            out = augment::gaussian_blur(&out, sigma);
        }
        if rng.random_bool(self.solarize_prob) {
            out = augment::solarize(&out, 128);
        }
        out
    }
}

/// A method's per-sample view pipeline.
#[derive(Config, Debug)]
pub struct MultiViewTransform {
    /// The per-view configurations, in batch order.
    pub views: Vec<ViewConfig>,
}

impl MultiViewTransform {
    /// Two identical SimCLR-style views.
    pub fn contrastive_pair(size: usize) -> Self {
        Self {
            views: vec![ViewConfig::new(size), ViewConfig::new(size)],
        }
    }

    /// The asymmetric BYOL pair: a strong-blur branch and a weak-blur,
    /// solarizing branch, both with toned-down jitter.
    pub fn asymmetric_pair(size: usize) -> Self {
        let base = |v: ViewConfig| {
            v.with_jitter_brightness(0.4)
                .with_jitter_contrast(0.4)
                .with_jitter_saturation(0.2)
                .with_jitter_hue(0.1)
        };
        Self {
            views: vec![
                base(ViewConfig::new(size)).with_blur_prob(1.0),
                base(ViewConfig::new(size))
                    .with_blur_prob(0.1)
                    .with_solarize_prob(0.2),
            ],
        }
    }

    /// Multi-crop: `n_global` global views plus `n_local` small crops.
    pub fn multi_crop(
        global_size: usize,
        local_size: usize,
        n_global: usize,
        n_local: usize,
        global_scale: (f64, f64),
        local_scale: (f64, f64),
    ) -> Self {
        let mut views = Vec::with_capacity(n_global + n_local);
        for _ in 0..n_global {
            views.push(
                ViewConfig::new(global_size)
                    .with_crop_scale_min(global_scale.0)
                    .with_crop_scale_max(global_scale.1),
            );
        }
        for _ in 0..n_local {
            views.push(
                ViewConfig::new(local_size)
                    .with_crop_scale_min(local_scale.0)
                    .with_crop_scale_max(local_scale.1)
                    .with_blur_prob(0.5),
            );
        }
        Self { views }
    }

    /// Number of views per sample.
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Render all views of one image.
    pub fn apply<R: Rng>(
        &self,
        img: &RgbImage,
        rng: &mut R,
    ) -> Vec<TensorData> {
        self.views
            .iter()
            .map(|view| to_tensor_data(&view.apply(img, rng)))
            .collect()
    }
}

/// Deterministic evaluation transform: resize, center crop, normalize.
#[derive(Config, Debug)]
pub struct EvalTransform {
    /// Smaller-edge resize target.
    #[config(default = 256)]
    pub resize: usize,

    /// Center crop size.
    #[config(default = 224)]
    pub crop: usize,
}

impl Default for EvalTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalTransform {
    /// Render the evaluation view of one image.
    pub fn apply(
        &self,
        img: &RgbImage,
    ) -> TensorData {
        let resized = augment::resize_smaller_edge(img, self.resize as u32);
        let cropped = augment::center_crop(&resized, self.crop as u32);
        to_tensor_data(&cropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gradient_image(
        width: u32,
        height: u32,
    ) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_to_tensor_data_shape_and_normalization() {
        let img = gradient_image(4, 2);
        let data = to_tensor_data(&img);
        assert_eq!(data.shape, vec![3, 2, 4]);

        // A zero pixel maps to -mean/std.
        let values = data.to_vec::<f32>().unwrap();
        assert!((values[0] - (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0]).abs() < 1e-5);
    }

    #[test]
    fn test_contrastive_pair_views() {
        let transform = MultiViewTransform::contrastive_pair(32);
        assert_eq!(transform.num_views(), 2);

        let mut rng = StdRng::seed_from_u64(11);
        let views = transform.apply(&gradient_image(64, 48), &mut rng);
        assert_eq!(views.len(), 2);
        for view in views {
            assert_eq!(view.shape, vec![3, 32, 32]);
        }
    }

    #[test]
    fn test_asymmetric_pair_branches_differ() {
        let transform = MultiViewTransform::asymmetric_pair(32);
        assert_eq!(transform.views[0].blur_prob, 1.0);
        assert_eq!(transform.views[0].solarize_prob, 0.0);
        assert_eq!(transform.views[1].blur_prob, 0.1);
        assert_eq!(transform.views[1].solarize_prob, 0.2);
    }

    #[test]
    fn test_multi_crop_sizes() {
        let transform = MultiViewTransform::multi_crop(32, 16, 2, 6, (0.4, 1.0), (0.05, 0.4));
        assert_eq!(transform.num_views(), 8);

        let mut rng = StdRng::seed_from_u64(5);
        let views = transform.apply(&gradient_image(64, 64), &mut rng);
        assert_eq!(views[0].shape, vec![3, 32, 32]);
        assert_eq!(views[2].shape, vec![3, 16, 16]);
        assert_eq!(views[7].shape, vec![3, 16, 16]);
    }

    #[test]
    fn test_eval_transform_is_deterministic() {
        let transform = EvalTransform::new().with_resize(40).with_crop(32);
        let img = gradient_image(100, 80);

        let a = transform.apply(&img).to_vec::<f32>().unwrap();
        let b = transform.apply(&img).to_vec::<f32>().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3 * 32 * 32);
    }
}
