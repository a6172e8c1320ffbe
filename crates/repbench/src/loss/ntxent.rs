//! # NT-Xent Contrastive Loss
//!
//! The normalized temperature-scaled cross-entropy of SimCLR, plus the
//! queue-backed InfoNCE variant used by momentum-contrast methods.

use crate::loss::{MASK_VALUE, identity, l2_normalize};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::{Backend, Int, Tensor};

/// NT-Xent loss over two batches of views.
#[derive(Debug, Clone)]
pub struct NtXentLoss {
    /// Softmax temperature.
    pub temperature: f64,
}

impl Default for NtXentLoss {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl NtXentLoss {
    /// Create the loss with the given temperature.
    pub fn new(temperature: f64) -> Self {
        assert!(temperature > 0.0, "temperature must be positive");
        Self { temperature }
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `z0`, `z1`: ``[batch, dim]`` paired view embeddings;
    ///   row `i` of `z0` and row `i` of `z1` are the positive pair.
    ///
    /// # Returns
    ///
    /// A scalar loss tensor.
    pub fn forward<B: Backend>(
        &self,
        z0: Tensor<B, 2>,
        z1: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [n, _dim] = z0.dims();
        let device = z0.device();

        let z = Tensor::cat(vec![l2_normalize(z0), l2_normalize(z1)], 0);
        let sim = z.clone().matmul(z.transpose()).div_scalar(self.temperature);

        // Self-similarities never count as candidates.
        let eye = identity::<B>(2 * n, &device);
        let logits = sim + eye * MASK_VALUE;

        // Row i's positive sits at (i + n) % 2n.
        let targets: Vec<i32> = (0..2 * n).map(|i| ((i + n) % (2 * n)) as i32).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &device);

        CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, targets)
    }
}

/// InfoNCE loss against a queue of negatives.
///
/// The positive is the paired key; negatives come from an external
/// ``[queue_len, dim]`` buffer of past keys.
#[derive(Debug, Clone)]
pub struct QueueInfoNceLoss {
    /// Softmax temperature.
    pub temperature: f64,
}

impl QueueInfoNceLoss {
    /// Create the loss with the given temperature.
    pub fn new(temperature: f64) -> Self {
        assert!(temperature > 0.0, "temperature must be positive");
        Self { temperature }
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `query`: ``[batch, dim]`` query embeddings.
    /// - `key`: ``[batch, dim]`` positive key embeddings (detached).
    /// - `queue`: ``[queue_len, dim]`` negative key buffer.
    pub fn forward<B: Backend>(
        &self,
        query: Tensor<B, 2>,
        key: Tensor<B, 2>,
        queue: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [n, _dim] = query.dims();
        let device = query.device();

        let query = l2_normalize(query);
        let key = l2_normalize(key);

        let l_pos = (query.clone() * key).sum_dim(1);
        let l_neg = query.matmul(queue.transpose());

        let logits = Tensor::cat(vec![l_pos, l_neg], 1).div_scalar(self.temperature);

        // The positive is always column 0.
        let targets = Tensor::<B, 1, Int>::zeros([n], &device);

        CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;
    use burn::tensor::Distribution;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_scalar()
    }

    #[test]
    fn test_ntxent_prefers_aligned_pairs() {
        let device = Default::default();

        let z0 = Tensor::<TestBackend, 2>::random([8, 16], Distribution::Normal(0.0, 1.0), &device);

        // Positives identical to the queries score lower than random ones.
        let aligned = NtXentLoss::new(0.1).forward(z0.clone(), z0.clone());
        let random = NtXentLoss::new(0.1).forward(
            z0,
            Tensor::random([8, 16], Distribution::Normal(0.0, 1.0), &device),
        );

        assert!(scalar(aligned.clone()).is_finite());
        assert!(scalar(aligned) < scalar(random));
    }

    #[test]
    fn test_ntxent_symmetric_in_views() {
        let device = Default::default();

        let z0 = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let z1 = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);

        let loss = NtXentLoss::default();
        let a = scalar(loss.forward(z0.clone(), z1.clone()));
        let b = scalar(loss.forward(z1, z0));
        assert!((a - b).abs() < 1e-4);
    }

    #[test]
    fn test_queue_info_nce_finite() {
        let device = Default::default();

        let q = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let k = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let queue =
            Tensor::<TestBackend, 2>::random([32, 8], Distribution::Normal(0.0, 1.0), &device);

        let loss = QueueInfoNceLoss::new(0.2).forward(q.clone(), k, queue.clone());
        assert!(scalar(loss.clone()).is_finite());

        // A matching key beats the queue negatives.
        let easy = QueueInfoNceLoss::new(0.2).forward(q.clone(), q, queue);
        assert!(scalar(easy) < scalar(loss) + 5.0);
    }

    #[test]
    #[should_panic(expected = "temperature must be positive")]
    fn test_zero_temperature_rejected() {
        NtXentLoss::new(0.0);
    }
}
