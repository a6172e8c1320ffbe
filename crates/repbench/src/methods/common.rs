//! # Shared Method Machinery
//!
//! The online linear classifier every method trains on detached
//! features, and the exponential-moving-average update used by
//! momentum-target methods.

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Int, Tensor};
use burn::tensor::TensorData;
use std::collections::HashMap;
use std::f64::consts::PI;

/// [`OnlineClassifier`] Config.
#[derive(Config, Debug)]
pub struct OnlineClassifierConfig {
    /// Backbone feature size.
    pub feature_dim: usize,

    /// Number of classes.
    pub num_classes: usize,
}

impl OnlineClassifierConfig {
    /// Initialize an [`OnlineClassifier`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> OnlineClassifier<B> {
        OnlineClassifier {
            linear: LinearConfig::new(self.feature_dim, self.num_classes).init(device),
        }
    }
}

/// A linear probe trained alongside pretraining.
///
/// Callers detach the features they feed in, so the probe's gradient
/// never reaches the backbone; its validation accuracy tracks
/// representation quality for free.
#[derive(Module, Debug)]
pub struct OnlineClassifier<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> OnlineClassifier<B> {
    /// Class logits for a feature batch.
    pub fn forward(
        &self,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        self.linear.forward(features)
    }

    /// Cross-entropy training loss.
    pub fn loss(
        &self,
        features: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let logits = self.forward(features);
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }
}

/// Cosine-ramped momentum: `base` at the start of training, 1.0 at
/// the end.
pub fn cosine_momentum(
    base: f64,
    progress: f64,
) -> f64 {
    let progress = progress.clamp(0.0, 1.0);
    1.0 - (1.0 - base) * 0.5 * (1.0 + (PI * progress).cos())
}

struct ParamSnapshot<B: Backend> {
    params: HashMap<ParamId, TensorData>,
    marker: core::marker::PhantomData<B>,
}

impl<B: Backend> ModuleVisitor<B> for ParamSnapshot<B> {
    fn visit_float<const D: usize>(
        &mut self,
        id: ParamId,
        tensor: &Tensor<B, D>,
    ) {
        self.params.insert(id, tensor.to_data());
    }
}

struct EmaMapper<B: Backend> {
    params: HashMap<ParamId, TensorData>,
    tau: f64,
    marker: core::marker::PhantomData<B>,
}

impl<B: Backend> ModuleMapper<B> for EmaMapper<B> {
    fn map_float<const D: usize>(
        &mut self,
        id: ParamId,
        tensor: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self.params.get(&id) {
            Some(data) => {
                let source = Tensor::from_data(data.clone(), &tensor.device());
                tensor.mul_scalar(self.tau) + source.mul_scalar(1.0 - self.tau)
            }
            None => tensor,
        }
    }
}

/// Exponential-moving-average update of a momentum target.
///
/// `target` must have been created as a clone of `source` so parameter
/// ids pair up; unmatched parameters are left untouched.
///
/// Returns ``tau * target + (1 - tau) * source`` per parameter.
pub fn ema_update<B: Backend, M: Module<B>>(
    source: &M,
    target: M,
    tau: f64,
) -> M {
    let mut snapshot = ParamSnapshot {
        params: HashMap::new(),
        marker: core::marker::PhantomData,
    };
    source.visit(&mut snapshot);

    let mut mapper = EmaMapper {
        params: snapshot.params,
        tau,
        marker: core::marker::PhantomData,
    };
    target.map(&mut mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;
    use burn::tensor::Distribution;

    #[test]
    fn test_online_classifier_shapes_and_loss() {
        let device = Default::default();
        let classifier: OnlineClassifier<TestBackend> =
            OnlineClassifierConfig::new(16, 4).init(&device);

        let features =
            Tensor::random([8, 16], Distribution::Normal(0.0, 1.0), &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints(
            [0, 1, 2, 3, 0, 1, 2, 3].as_slice(),
            &device,
        );

        let logits = classifier.forward(features.clone());
        assert_eq!(logits.dims(), [8, 4]);

        let loss: f32 = classifier.loss(features, targets).into_scalar();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn test_cosine_momentum_endpoints() {
        assert!((cosine_momentum(0.996, 0.0) - 0.996).abs() < 1e-12);
        assert!((cosine_momentum(0.996, 1.0) - 1.0).abs() < 1e-12);

        let mid = cosine_momentum(0.996, 0.5);
        assert!(mid > 0.996);
        assert!(mid < 1.0);
    }

    #[test]
    fn test_ema_update_blends_parameters() {
        let device = Default::default();

        let source: OnlineClassifier<TestBackend> =
            OnlineClassifierConfig::new(4, 2).init(&device);
        let target = source.clone();

        // tau=0: the target becomes the source exactly.
        let copied = ema_update(&source, target.clone(), 0.0);
        let src = source.linear.weight.val().into_data();
        let got = copied.linear.weight.val().into_data();
        got.assert_approx_eq(&src, 5);

        // tau=1: the target is unchanged.
        let frozen = ema_update(&source, target.clone(), 1.0);
        let before = target.linear.weight.val().into_data();
        let after = frozen.linear.weight.val().into_data();
        after.assert_approx_eq(&before, 5);
    }

    #[test]
    fn test_ema_update_moves_monotonically() {
        let device = Default::default();

        let source: OnlineClassifier<TestBackend> =
            OnlineClassifierConfig::new(4, 2).init(&device);
        // A diverged copy with the same parameter ids.
        let target = source
            .clone()
            .map(&mut AddOne::<TestBackend>(core::marker::PhantomData));

        let updated = ema_update(&source, target.clone(), 0.9);

        let src = source.linear.weight.val().into_data().to_vec::<f32>().unwrap();
        let old = target.linear.weight.val().into_data().to_vec::<f32>().unwrap();
        let new = updated.linear.weight.val().into_data().to_vec::<f32>().unwrap();

        for ((s, o), n) in src.iter().zip(old.iter()).zip(new.iter()) {
            assert!((n - (0.9 * o + 0.1 * s)).abs() < 1e-5);
        }
    }

    struct AddOne<B: Backend>(core::marker::PhantomData<B>);

    impl<B: Backend> ModuleMapper<B> for AddOne<B> {
        fn map_float<const D: usize>(
            &mut self,
            _id: ParamId,
            tensor: Tensor<B, D>,
        ) -> Tensor<B, D> {
            tensor + 1.0
        }
    }
}
