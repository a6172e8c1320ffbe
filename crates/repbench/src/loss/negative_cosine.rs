//! # Negative Cosine Similarity
//!
//! The prediction loss of BYOL-style asymmetric twins: the online
//! branch's prediction is pulled toward the target branch's projection.

use crate::loss::l2_normalize;
use burn::prelude::{Backend, Tensor};

/// Mean negative cosine similarity between paired rows.
#[derive(Debug, Clone, Default)]
pub struct NegativeCosineSimilarity;

impl NegativeCosineSimilarity {
    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `prediction`: ``[batch, dim]`` online predictions.
    /// - `target`: ``[batch, dim]`` target projections; callers detach.
    ///
    /// # Returns
    ///
    /// A scalar in ``[-1, 1]``; -1 at perfect alignment.
    pub fn forward<B: Backend>(
        &self,
        prediction: Tensor<B, 2>,
        target: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        (l2_normalize(prediction) * l2_normalize(target))
            .sum_dim(1)
            .mean()
            .neg()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;
    use burn::tensor::Distribution;

    #[test]
    fn test_aligned_is_minus_one() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);

        let loss: f32 = NegativeCosineSimilarity
            .forward(x.clone(), x)
            .into_scalar();
        assert!((loss + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_opposed_is_plus_one() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);

        let loss: f32 = NegativeCosineSimilarity
            .forward(x.clone(), x.neg())
            .into_scalar();
        assert!((loss - 1.0).abs() < 1e-5);
    }
}
