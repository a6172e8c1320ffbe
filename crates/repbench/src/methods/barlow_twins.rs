//! # Barlow Twins
//!
//! Twin views through a wide projector; the loss pushes the
//! cross-correlation of the embeddings toward the identity.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::barlow::BarlowTwinsLoss;
use crate::methods::common::{OnlineClassifier, OnlineClassifierConfig};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// [`BarlowTwins`] Config.
#[derive(Config, Debug)]
pub struct BarlowTwinsConfig {
    /// Backbone config.
    pub backbone: ResNetConfig,

    /// Number of classes for the online classifier.
    pub num_classes: usize,

    /// Projector width (all three layers).
    #[config(default = 8192)]
    pub projector_dim: usize,

    /// Off-diagonal loss weight.
    #[config(default = 5e-3)]
    pub lambda: f64,
}

impl BarlowTwinsConfig {
    /// Initialize a [`BarlowTwins`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BarlowTwins<B> {
        let feature_dim = self.backbone.feature_dim();
        BarlowTwins {
            backbone: self.backbone.init(device),
            projection_head: MlpHeadConfig::batch_norm_mlp(&[
                feature_dim,
                self.projector_dim,
                self.projector_dim,
                self.projector_dim,
            ])
            .init(device),
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            lambda: self.lambda,
        }
    }
}

/// Barlow Twins model.
#[derive(Module, Debug)]
pub struct BarlowTwins<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,
    online_classifier: OnlineClassifier<B>,
    lambda: f64,
}

impl<B: Backend> RepresentationModel<B> for BarlowTwins<B> {
    fn features(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.backbone.forward_features(images)
    }

    fn classify(
        &self,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        self.online_classifier.forward(features)
    }
}

impl<B: AutodiffBackend> SslMethod<B> for BarlowTwins<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        _ctx: &StepContext,
    ) -> PretrainOutput<B> {
        let [v0, v1] = <[Tensor<B, 4>; 2]>::try_from(batch.views)
            .expect("redundancy reduction takes exactly two views");

        let f0 = self.backbone.forward_features(v0);
        let f1 = self.backbone.forward_features(v1);

        let z0 = self.projection_head.forward(f0.clone());
        let z1 = self.projection_head.forward(f1);

        let method_loss = BarlowTwinsLoss::new(self.lambda).forward(z0, z1);
        let classifier_loss = self.online_classifier.loss(f0.detach(), batch.targets);

        PretrainOutput::new(method_loss, classifier_loss)
    }

    fn into_backbone(self) -> ResNet<B> {
        self.backbone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAutodiffBackend, tiny_resnet_config};
    use burn::tensor::{Distribution, Int};

    #[test]
    fn test_pretrain_step() {
        let device = Default::default();
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 1,
        };

        let mut model: BarlowTwins<TestAutodiffBackend> =
            BarlowTwinsConfig::new(tiny_resnet_config(), 4)
                .with_projector_dim(32)
                .init(&device);

        let batch = MultiViewBatch {
            views: vec![
                Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device),
                Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device),
            ],
            targets: Tensor::<TestAutodiffBackend, 1, Int>::from_ints(
                [0, 1, 2, 3].as_slice(),
                &device,
            ),
        };

        let output = model.pretrain_step(batch, &ctx);
        assert!(output.method_loss.is_finite());
        assert!(output.method_loss >= 0.0);
        let _grads = output.loss.backward();
    }
}
