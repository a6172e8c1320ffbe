//! # Weighted k-NN Evaluation
//!
//! Scores a frozen representation without any training: every
//! validation sample votes among its nearest training neighbors by
//! cosine similarity, weighted with a softened exponential.

use crate::data::ImageFolder;
use crate::eval::features::{FeatureSet, extract_features};
use crate::eval::{AccuracyCounter, ClassificationMetrics};
use crate::loss::l2_normalize;
use crate::methods::RepresentationModel;
use crate::transforms::EvalTransform;
use burn::config::Config;
use burn::prelude::Backend;

/// k-NN protocol parameters.
#[derive(Config, Debug)]
pub struct KnnEvalConfig {
    /// Neighbors per vote.
    #[config(default = 20)]
    pub k: usize,

    /// Vote-weight temperature.
    #[config(default = 0.07)]
    pub temperature: f64,

    /// Evaluation batch size.
    #[config(default = 256)]
    pub batch_size: usize,

    /// Dataloader workers.
    #[config(default = 4)]
    pub num_workers: usize,
}

/// Run the k-NN protocol.
///
/// Extracts features for both splits, then scores the validation set
/// against the training set.
pub fn knn_eval<B: Backend, M: RepresentationModel<B>>(
    model: &M,
    train_dataset: ImageFolder,
    val_dataset: ImageFolder,
    config: &KnnEvalConfig,
) -> ClassificationMetrics {
    let num_classes = train_dataset.num_classes();

    let train = extract_features(
        model,
        train_dataset,
        EvalTransform::default(),
        config.batch_size,
        config.num_workers,
    );
    let val = extract_features(
        model,
        val_dataset,
        EvalTransform::default(),
        config.batch_size,
        config.num_workers,
    );

    knn_score(&train, &val, num_classes, config)
}

/// Score pre-extracted features.
pub fn knn_score<B: Backend>(
    train: &FeatureSet<B>,
    val: &FeatureSet<B>,
    num_classes: usize,
    config: &KnnEvalConfig,
) -> ClassificationMetrics {
    assert!(!train.is_empty(), "training features are empty");
    let k = config.k.min(train.len());

    let train_features = l2_normalize(train.features.clone());
    let train_labels: Vec<i64> = train
        .labels
        .clone()
        .into_data()
        .convert::<i64>()
        .to_vec()
        .expect("labels convert to i64");

    let val_features = l2_normalize(val.features.clone());
    let val_labels: Vec<i64> = val
        .labels
        .clone()
        .into_data()
        .convert::<i64>()
        .to_vec()
        .expect("labels convert to i64");

    let mut counter = AccuracyCounter::new();

    // Chunk the similarity matrix so memory stays bounded.
    let chunk = config.batch_size.max(1);
    let total = val.len();
    let mut start = 0;
    while start < total {
        let end = (start + chunk).min(total);
        let block = val_features.clone().slice([start..end]);

        let sim = block.matmul(train_features.clone().transpose());
        let (weights, indices) = sim.topk_with_indices(k, 1);
        let weights = weights.div_scalar(config.temperature).exp();

        let n = end - start;
        let weights: Vec<f32> = weights
            .into_data()
            .convert::<f32>()
            .to_vec()
            .expect("weights convert to f32");
        let indices: Vec<i64> = indices
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("indices convert to i64");

        let mut scores = vec![0.0f32; n * num_classes];
        for row in 0..n {
            for j in 0..k {
                let neighbor = indices[row * k + j] as usize;
                let class = train_labels[neighbor] as usize;
                scores[row * num_classes + class] += weights[row * k + j];
            }
        }

        counter.update_host(&scores, num_classes, &val_labels[start..end]);
        start = end;
    }

    counter.metrics()
}
