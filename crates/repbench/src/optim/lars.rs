//! # LARS Optimizer
//!
//! Layer-wise adaptive rate scaling: each parameter tensor's step is
//! scaled by a trust ratio of its weight norm to its gradient norm.
//! Large-batch contrastive recipes depend on it.
//!
//! Rank-1 parameters (biases, norm scales) skip both weight decay and
//! trust scaling, which covers the parameter set the reference recipes
//! exclude via optimizer groups.

use burn::LearningRate;
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::SimpleOptimizer;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::prelude::{Backend, Tensor};
use burn::record::Record;
use burn::tensor::backend::AutodiffBackend;

/// [`Lars`] Config.
#[derive(Config, Debug)]
pub struct LarsConfig {
    /// Momentum factor.
    #[config(default = 0.9)]
    pub momentum: f64,

    /// L2 weight decay.
    #[config(default = 1e-6)]
    pub weight_decay: f64,

    /// Trust-ratio coefficient.
    #[config(default = 1e-3)]
    pub trust_coefficient: f64,

    /// Denominator guard.
    #[config(default = 1e-8)]
    pub epsilon: f64,
}

impl LarsConfig {
    /// Initialize the optimizer for a module.
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(
        &self,
    ) -> OptimizerAdaptor<Lars, M, B> {
        OptimizerAdaptor::from(Lars {
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            trust_coefficient: self.trust_coefficient,
            epsilon: self.epsilon,
        })
    }
}

/// LARS optimizer.
#[derive(Debug, Clone)]
pub struct Lars {
    momentum: f64,
    weight_decay: f64,
    trust_coefficient: f64,
    epsilon: f64,
}

/// [`Lars`] per-parameter state.
#[derive(Record, Clone)]
pub struct LarsState<B: Backend, const D: usize> {
    /// Momentum buffer.
    pub momentum: Tensor<B, D>,
}

impl<B: Backend, const D: usize> LarsState<B, D> {
    /// Create the state from a momentum buffer.
    pub fn new(momentum: Tensor<B, D>) -> Self {
        Self { momentum }
    }
}

impl<B: Backend> SimpleOptimizer<B> for Lars {
    type State<const D: usize> = LarsState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let update = if D > 1 {
            let device = tensor.device();

            let w_norm = tensor.clone().powf_scalar(2.0).sum().sqrt();
            let g_norm = grad.clone().powf_scalar(2.0).sum().sqrt();

            let denom = g_norm.clone()
                + w_norm.clone().mul_scalar(self.weight_decay)
                + self.epsilon;
            let trust = w_norm.clone().mul_scalar(self.trust_coefficient) / denom;

            // Zero weights or gradients fall back to an unscaled step.
            let inactive = (w_norm * g_norm).equal_elem(0.0);
            let trust = trust.mask_where(inactive, Tensor::ones([1], &device));

            let decayed = grad + tensor.clone().mul_scalar(self.weight_decay);
            (decayed * trust.reshape([1; D])).mul_scalar(lr)
        } else {
            grad.mul_scalar(lr)
        };

        let update = match state {
            Some(state) => state.momentum.mul_scalar(self.momentum) + update,
            None => update,
        };

        let state = LarsState::new(update.clone());
        (tensor - update, Some(state))
    }

    fn to_device<const D: usize>(
        mut state: Self::State<D>,
        device: &B::Device,
    ) -> Self::State<D> {
        state.momentum = state.momentum.to_device(device);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;
    use burn::tensor::Distribution;

    fn lars() -> Lars {
        Lars {
            momentum: 0.9,
            weight_decay: 1e-6,
            trust_coefficient: 1e-3,
            epsilon: 1e-8,
        }
    }

    #[test]
    fn test_step_moves_against_gradient() {
        let device = Default::default();
        let optim = lars();

        let w = Tensor::<TestBackend, 2>::random([4, 4], Distribution::Normal(0.0, 1.0), &device);
        let g = Tensor::<TestBackend, 2>::ones([4, 4], &device);

        let (w2, state) = optim.step(0.1, w.clone(), g.clone(), None);
        assert!(state.is_some());

        // The update follows -grad: every element shrinks.
        let before = w.into_data().to_vec::<f32>().unwrap();
        let after = w2.into_data().to_vec::<f32>().unwrap();
        for (b, a) in before.iter().zip(after.iter()) {
            assert!(a < b);
        }
    }

    #[test]
    fn test_trust_ratio_bounds_step_size() {
        let device = Default::default();
        let optim = lars();

        let w = Tensor::<TestBackend, 2>::ones([4, 4], &device);
        // A huge gradient is tamed by the trust ratio.
        let g = Tensor::<TestBackend, 2>::ones([4, 4], &device).mul_scalar(1e6);

        let (w2, _) = optim.step(1.0, w.clone(), g, None);
        let delta = (w - w2).abs().max().into_scalar();
        assert!(delta < 1.0, "trust ratio failed to bound step: {delta}");
    }

    #[test]
    fn test_rank1_params_skip_trust_scaling() {
        let device = Default::default();
        let optim = lars();

        let w = Tensor::<TestBackend, 1>::ones([4], &device);
        let g = Tensor::<TestBackend, 1>::ones([4], &device);

        let (w2, _) = optim.step(0.5, w, g, None);
        let data = w2.into_data().to_vec::<f32>().unwrap();
        for v in data {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_momentum_accumulates() {
        let device = Default::default();
        let optim = lars();

        let w = Tensor::<TestBackend, 1>::ones([2], &device);
        let g = Tensor::<TestBackend, 1>::ones([2], &device);

        let (w1, state) = optim.step(0.1, w, g.clone(), None);
        let (w2, _) = optim.step(0.1, w1.clone(), g, state);

        // Second step is larger: lr*(1 + momentum).
        let d1 = 1.0 - w1.into_data().to_vec::<f32>().unwrap()[0];
        let d2_total = 1.0 - w2.into_data().to_vec::<f32>().unwrap()[0];
        let d2 = d2_total - d1;
        assert!(d2 > d1 * 1.5);
    }

    #[test]
    fn test_zero_gradient_keeps_weights() {
        let device = Default::default();
        let optim = lars();

        let w = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        let g = Tensor::<TestBackend, 2>::zeros([2, 2], &device);

        let (w2, _) = optim.step(0.1, w.clone(), g, None);
        let diff = (w - w2).abs().max().into_scalar();
        // Only the (tiny) decoupled weight-decay term moves them.
        assert!(diff < 1e-5);
    }
}
