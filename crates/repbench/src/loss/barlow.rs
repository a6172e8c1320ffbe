//! # Barlow Twins Loss
//!
//! Drives the cross-correlation matrix of two batch-normalized view
//! embeddings toward the identity: invariance on the diagonal,
//! redundancy reduction off it.

use crate::loss::identity;
use burn::prelude::{Backend, Tensor};

/// Barlow Twins redundancy-reduction loss.
#[derive(Debug, Clone)]
pub struct BarlowTwinsLoss {
    /// Off-diagonal weight.
    pub lambda: f64,
}

impl Default for BarlowTwinsLoss {
    fn default() -> Self {
        Self { lambda: 5e-3 }
    }
}

impl BarlowTwinsLoss {
    /// Create the loss with the given off-diagonal weight.
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }

    /// Normalize each embedding dimension over the batch.
    fn batch_normalize<B: Backend>(z: Tensor<B, 2>) -> Tensor<B, 2> {
        let mean = z.clone().mean_dim(0);
        let centered = z - mean;
        let std = centered
            .clone()
            .powf_scalar(2.0)
            .mean_dim(0)
            .sqrt()
            .clamp_min(1e-12);
        centered / std
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `z0`, `z1`: ``[batch, dim]`` paired view embeddings; batch
    ///   must be at least 2 for the batch statistics to be defined.
    pub fn forward<B: Backend>(
        &self,
        z0: Tensor<B, 2>,
        z1: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [n, dim] = z0.dims();
        assert!(n >= 2, "batch must hold at least two samples");
        let device = z0.device();

        let z0 = Self::batch_normalize(z0);
        let z1 = Self::batch_normalize(z1);

        // Cross-correlation [dim, dim]
        let c = z0.transpose().matmul(z1).div_scalar(n as f64);

        let eye = identity::<B>(dim, &device);
        let on_diag = (c.clone() * eye.clone() - eye.clone())
            .powf_scalar(2.0)
            .sum();
        let off_diag = (c * (eye.neg().add_scalar(1.0))).powf_scalar(2.0).sum();

        on_diag + off_diag.mul_scalar(self.lambda)
    }
}
