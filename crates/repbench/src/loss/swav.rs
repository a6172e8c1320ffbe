//! # SwAV Swapped-Prediction Loss
//!
//! Online clustering against a prototype bank: Sinkhorn–Knopp turns
//! detached prototype scores into balanced soft assignments, and each
//! view predicts the assignments of the other views.

use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::log_softmax;

/// SwAV loss.
#[derive(Debug, Clone)]
pub struct SwavLoss {
    /// Prediction softmax temperature.
    pub temperature: f64,

    /// Sinkhorn normalization iterations.
    pub sinkhorn_iterations: usize,

    /// Sinkhorn entropy regularization.
    pub sinkhorn_epsilon: f64,
}

impl Default for SwavLoss {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            sinkhorn_iterations: 3,
            sinkhorn_epsilon: 0.05,
        }
    }
}

/// Sinkhorn–Knopp balanced soft assignments.
///
/// # Arguments
///
/// - `scores`: ``[batch, prototypes]`` raw prototype scores.
///
/// # Returns
///
/// A ``[batch, prototypes]`` assignment matrix whose rows sum to 1.
pub fn sinkhorn<B: Backend>(
    scores: Tensor<B, 2>,
    epsilon: f64,
    iterations: usize,
) -> Tensor<B, 2> {
    let [n, k] = scores.dims();

    // [prototypes, batch]
    let mut q = scores.div_scalar(epsilon).exp().transpose();
    q = q.clone() / q.sum().reshape([1, 1]);

    for _ in 0..iterations {
        // Balance prototype rows, then sample columns.
        q = q.clone() / q.sum_dim(1);
        q = q.div_scalar(k as f64);
        q = q.clone() / q.sum_dim(0);
        q = q.div_scalar(n as f64);
    }

    q.mul_scalar(n as f64).transpose()
}

impl SwavLoss {
    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `high_res`: ``[batch, prototypes]`` scores of the global views;
    ///   assignments are computed from these only.
    /// - `low_res`: scores of any additional local crops.
    pub fn forward<B: Backend>(
        &self,
        high_res: &[Tensor<B, 2>],
        low_res: &[Tensor<B, 2>],
    ) -> Tensor<B, 1> {
        assert!(
            high_res.len() >= 2,
            "need at least two global views for swapped prediction"
        );

        let device = high_res[0].device();
        let n_views = high_res.len() + low_res.len();

        let mut total = Tensor::<B, 1>::zeros([1], &device);
        let mut terms = 0usize;

        for (a_idx, scores) in high_res.iter().enumerate() {
            let assignment = sinkhorn(
                scores.clone().detach(),
                self.sinkhorn_epsilon,
                self.sinkhorn_iterations,
            );

            for (b_idx, other) in high_res.iter().chain(low_res.iter()).enumerate() {
                if b_idx == a_idx {
                    continue;
                }
                let log_p = log_softmax(other.clone().div_scalar(self.temperature), 1);
                let ce = (assignment.clone() * log_p).sum_dim(1).mean().neg();
                total = total + ce;
                terms += 1;
            }
        }

        debug_assert_eq!(terms, high_res.len() * (n_views - 1));
        total.div_scalar(terms as f64)
    }
}
