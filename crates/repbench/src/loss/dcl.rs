//! # Decoupled Contrastive Loss
//!
//! DCL removes the positive pair from the InfoNCE denominator; the
//! weighted form (DCLW) re-scales the positive term with a von
//! Mises–Fisher weighting over the batch.

use crate::loss::{MASK_VALUE, identity, l2_normalize, logsumexp};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// Decoupled contrastive loss.
#[derive(Debug, Clone)]
pub struct DclLoss {
    /// Softmax temperature.
    pub temperature: f64,

    /// von Mises–Fisher concentration for the weighted variant;
    /// `None` gives plain DCL.
    pub sigma: Option<f64>,
}

impl DclLoss {
    /// Plain DCL with the given temperature.
    pub fn new(temperature: f64) -> Self {
        assert!(temperature > 0.0, "temperature must be positive");
        Self {
            temperature,
            sigma: None,
        }
    }

    /// Weighted DCLW with the given temperature and concentration.
    pub fn weighted(
        temperature: f64,
        sigma: f64,
    ) -> Self {
        assert!(temperature > 0.0, "temperature must be positive");
        assert!(sigma > 0.0, "sigma must be positive");
        Self {
            temperature,
            sigma: Some(sigma),
        }
    }

    /// One direction of the loss; `forward` symmetrizes.
    fn half_loss<B: Backend>(
        &self,
        z0: Tensor<B, 2>,
        z1: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let [n, _dim] = z0.dims();
        let device = z0.device();
        let eye = identity::<B>(n, &device);

        let sim_01 = z0
            .clone()
            .matmul(z1.clone().transpose())
            .div_scalar(self.temperature);
        let sim_00 = z0
            .clone()
            .matmul(z0.clone().transpose())
            .div_scalar(self.temperature);

        // Positive term: the paired diagonal.
        let positive = (sim_01.clone() * eye.clone()).sum_dim(1);
        let positive = match self.sigma {
            None => positive,
            Some(sigma) => {
                // Weight each positive by how concentrated its pair is
                // relative to the batch.
                let align = (z0 * z1).sum_dim(1).div_scalar(sigma);
                let weights = softmax(align, 0).mul_scalar(n as f64).neg().add_scalar(2.0);
                positive * weights.detach()
            }
        };

        // Negatives: everything except self and the positive pair.
        let masked_00 = sim_00 + eye.clone() * MASK_VALUE;
        let masked_01 = sim_01 + eye * MASK_VALUE;
        let negative = logsumexp(Tensor::cat(vec![masked_00, masked_01], 1));

        (negative - positive).mean()
    }

    /// Compute the symmetrized loss.
    ///
    /// # Arguments
    ///
    /// - `z0`, `z1`: ``[batch, dim]`` paired view embeddings.
    pub fn forward<B: Backend>(
        &self,
        z0: Tensor<B, 2>,
        z1: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let z0 = l2_normalize(z0);
        let z1 = l2_normalize(z1);

        (self.half_loss(z0.clone(), z1.clone()) + self.half_loss(z1, z0)).div_scalar(2.0)
    }
}
