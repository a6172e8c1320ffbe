//! # Feature Extraction
//!
//! Runs a representation model over a dataset with the evaluation
//! transform and collects pooled features plus labels.

use crate::data::{EvalBatcher, ImageFolder};
use crate::methods::RepresentationModel;
use crate::transforms::EvalTransform;
use burn::data::dataloader::DataLoaderBuilder;
use burn::prelude::{Backend, Int, Tensor};

/// Extracted features and their labels.
#[derive(Debug, Clone)]
pub struct FeatureSet<B: Backend> {
    /// Pooled features, ``[samples, feature_dim]``.
    pub features: Tensor<B, 2>,

    /// Class labels, ``[samples]``.
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> FeatureSet<B> {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.features.dims()[0]
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extract features for a whole dataset.
pub fn extract_features<B: Backend, M: RepresentationModel<B>>(
    model: &M,
    dataset: ImageFolder,
    transform: EvalTransform,
    batch_size: usize,
    num_workers: usize,
) -> FeatureSet<B> {
    let dataloader = DataLoaderBuilder::new(EvalBatcher::<B>::new(transform))
        .batch_size(batch_size)
        .num_workers(num_workers)
        .build(dataset);

    let mut features = Vec::new();
    let mut labels = Vec::new();
    for batch in dataloader.iter() {
        features.push(model.features(batch.images).detach());
        labels.push(batch.targets);
    }

    FeatureSet {
        features: Tensor::cat(features, 0),
        labels: Tensor::cat(labels, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::simclr::SimclrConfig;
    use crate::testing::{TestBackend, tiny_resnet_config};
    use image::{Rgb, RgbImage};

    #[test]
    fn test_extract_features_covers_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        for class in ["a", "b"] {
            let dir = tmp.path().join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..3 {
                RgbImage::from_pixel(40, 40, Rgb([i as u8 * 50, 100, 150]))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }

        let device = Default::default();
        let model = SimclrConfig::new(tiny_resnet_config(), 2)
            .with_hidden_dim(16)
            .with_output_dim(8)
            .init::<TestBackend>(&device);

        let dataset = ImageFolder::scan(tmp.path()).unwrap();
        let transform = EvalTransform::new().with_resize(40).with_crop(32);
        let set = extract_features(&model, dataset, transform, 4, 1);

        assert_eq!(set.len(), 6);
        assert_eq!(set.features.dims(), [6, 64]);
        assert_eq!(set.labels.dims(), [6]);
    }
}
