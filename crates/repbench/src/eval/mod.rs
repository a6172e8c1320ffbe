//! # Evaluation Protocols
//!
//! k-NN, linear-probe, fine-tune, and transfer scoring of a pretrained
//! backbone. Each stage returns [`ClassificationMetrics`], which the
//! benchmark driver persists as JSON.

pub mod features;
pub mod knn;
pub mod probe;
pub mod transfer;

use burn::prelude::{Backend, Int, Tensor};
use serde::{Deserialize, Serialize};

/// Top-1/top-5 classification accuracy over a sample set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    /// Top-1 accuracy in ``[0, 1]``.
    pub top1: f64,

    /// Top-5 accuracy in ``[0, 1]``.
    pub top5: f64,

    /// Number of scored samples.
    pub samples: usize,
}

/// Streaming top-1/top-5 accuracy counter.
#[derive(Debug, Clone, Default)]
pub struct AccuracyCounter {
    top1_hits: usize,
    top5_hits: usize,
    samples: usize,
}

impl AccuracyCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one batch of logits (or any per-class scores).
    pub fn update<B: Backend>(
        &mut self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) {
        let [_n, classes] = logits.dims();
        let scores: Vec<f32> = logits
            .into_data()
            .convert::<f32>()
            .to_vec()
            .expect("logits convert to f32");
        let targets: Vec<i64> = targets
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("targets convert to i64");

        self.update_host(&scores, classes, &targets);
    }

    /// Count one batch of host-side scores, row-major ``[n, classes]``.
    pub fn update_host(
        &mut self,
        scores: &[f32],
        classes: usize,
        targets: &[i64],
    ) {
        assert_eq!(scores.len(), classes * targets.len());

        for (row, &target) in targets.iter().enumerate() {
            let row = &scores[row * classes..(row + 1) * classes];

            let mut order: Vec<usize> = (0..classes).collect();
            order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));

            if order[0] as i64 == target {
                self.top1_hits += 1;
            }
            if order.iter().take(5).any(|&c| c as i64 == target) {
                self.top5_hits += 1;
            }
            self.samples += 1;
        }
    }

    /// Finalize into metrics.
    pub fn metrics(&self) -> ClassificationMetrics {
        let denom = self.samples.max(1) as f64;
        ClassificationMetrics {
            top1: self.top1_hits as f64 / denom,
            top5: self.top5_hits as f64 / denom,
            samples: self.samples,
        }
    }
}
