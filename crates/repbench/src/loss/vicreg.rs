//! # VICReg Loss
//!
//! Variance–invariance–covariance regularization: an MSE invariance
//! term, a hinge on per-dimension standard deviation, and a penalty on
//! off-diagonal covariance.

use crate::loss::identity;
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;

/// VICReg loss weights.
#[derive(Debug, Clone)]
pub struct VicRegLoss {
    /// Invariance (MSE) weight.
    pub inv_weight: f64,

    /// Variance hinge weight.
    pub var_weight: f64,

    /// Covariance weight.
    pub cov_weight: f64,
}

impl Default for VicRegLoss {
    fn default() -> Self {
        Self {
            inv_weight: 25.0,
            var_weight: 25.0,
            cov_weight: 1.0,
        }
    }
}

impl VicRegLoss {
    /// Hinge on the per-dimension standard deviation of one branch.
    fn variance_term<B: Backend>(z: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, _dim] = z.dims();
        let mean = z.clone().mean_dim(0);
        let centered = z - mean;
        let var = centered
            .powf_scalar(2.0)
            .sum_dim(0)
            .div_scalar((n - 1) as f64);
        let std = (var + 1e-4).sqrt();
        relu(std.neg().add_scalar(1.0)).mean()
    }

    /// Off-diagonal covariance penalty of one branch.
    fn covariance_term<B: Backend>(z: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, dim] = z.dims();
        let device = z.device();

        let mean = z.clone().mean_dim(0);
        let centered = z - mean;
        let cov = centered
            .clone()
            .transpose()
            .matmul(centered)
            .div_scalar((n - 1) as f64);

        let off_mask = identity::<B>(dim, &device).neg().add_scalar(1.0);
        (cov * off_mask).powf_scalar(2.0).sum().div_scalar(dim as f64)
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `z0`, `z1`: ``[batch, dim]`` paired view embeddings; batch
    ///   must be at least 2.
    pub fn forward<B: Backend>(
        &self,
        z0: Tensor<B, 2>,
        z1: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [n, _dim] = z0.dims();
        assert!(n >= 2, "batch must hold at least two samples");

        let inv = (z0.clone() - z1.clone()).powf_scalar(2.0).mean();

        let var = (Self::variance_term(z0.clone()) + Self::variance_term(z1.clone()))
            .div_scalar(2.0);

        let cov = Self::covariance_term(z0) + Self::covariance_term(z1);

        inv.mul_scalar(self.inv_weight)
            + var.mul_scalar(self.var_weight)
            + cov.mul_scalar(self.cov_weight)
    }
}
