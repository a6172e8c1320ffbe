//! # SimCLR
//!
//! Two augmented views, a projection head, and NT-Xent. The v2 variant
//! deepens the head to three layers with a 512-d output.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::ntxent::NtXentLoss;
use crate::methods::common::{OnlineClassifier, OnlineClassifierConfig};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// [`Simclr`] Config.
#[derive(Config, Debug)]
pub struct SimclrConfig {
    /// Backbone config.
    pub backbone: ResNetConfig,

    /// Number of classes for the online classifier.
    pub num_classes: usize,

    /// Projection-head hidden width.
    #[config(default = 2048)]
    pub hidden_dim: usize,

    /// Projection-head output width.
    #[config(default = 128)]
    pub output_dim: usize,

    /// Projection-head depth.
    #[config(default = 2)]
    pub head_layers: usize,

    /// NT-Xent temperature.
    #[config(default = 0.1)]
    pub temperature: f64,
}

impl SimclrConfig {
    /// The v2 head: three layers, 512-d output.
    pub fn v2(
        backbone: ResNetConfig,
        num_classes: usize,
    ) -> Self {
        Self::new(backbone, num_classes)
            .with_head_layers(3)
            .with_output_dim(512)
    }

    /// Initialize a [`Simclr`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Simclr<B> {
        let feature_dim = self.backbone.feature_dim();

        let mut dims = vec![feature_dim];
        dims.extend(std::iter::repeat_n(self.hidden_dim, self.head_layers - 1));
        dims.push(self.output_dim);

        Simclr {
            backbone: self.backbone.init(device),
            projection_head: MlpHeadConfig::batch_norm_mlp(&dims).init(device),
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            temperature: self.temperature,
        }
    }
}

/// SimCLR model.
#[derive(Module, Debug)]
pub struct Simclr<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,
    online_classifier: OnlineClassifier<B>,
    temperature: f64,
}

impl<B: Backend> RepresentationModel<B> for Simclr<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for Simclr<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        _ctx: &StepContext,
    ) -> PretrainOutput<B> {
        let [v0, v1] = <[Tensor<B, 4>; 2]>::try_from(batch.views)
            .expect("contrastive methods take exactly two views");

        let f0 = self.backbone.forward_features(v0);
        let f1 = self.backbone.forward_features(v1);

        let z0 = self.projection_head.forward(f0.clone());
        let z1 = self.projection_head.forward(f1);

        let method_loss = NtXentLoss::new(self.temperature).forward(z0, z1);
        let classifier_loss = self
            .online_classifier
            .loss(f0.detach(), batch.targets);

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

    pub fn tiny_config() -> SimclrConfig {
        SimclrConfig::new(tiny_resnet_config(), 4)
            .with_hidden_dim(32)
            .with_output_dim(16)
    }

    fn tiny_batch(device: &<TestAutodiffBackend as Backend>::Device) -> MultiViewBatch<TestAutodiffBackend> {
        MultiViewBatch {
            views: vec![
                Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), device),
                Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), device),
            ],
            targets: Tensor::<TestAutodiffBackend, 1, Int>::from_ints(
                [0, 1, 2, 3].as_slice(),
                device,
            ),
        }
    }

    #[test]
    fn test_v2_preset() {
        let config = SimclrConfig::v2(tiny_resnet_config(), 10);
        assert_eq!(config.head_layers, 3);
        assert_eq!(config.output_dim, 512);
    }

    #[test]
    fn test_pretrain_step_and_backward() {
        let device = Default::default();
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 1,
        };

        let mut model: Simclr<TestAutodiffBackend> = tiny_config().init(&device);
        let output = model.pretrain_step(tiny_batch(&device), &ctx);

        assert!(output.method_loss.is_finite());
        assert!(output.classifier_loss.is_finite());

        // The combined loss must be differentiable end to end.
        let _grads = output.loss.backward();
    }

    #[test]
    fn test_into_backbone_keeps_feature_dim() {
        let device = Default::default();
        let model: Simclr<TestAutodiffBackend> = tiny_config().init(&device);

        let backbone = SslMethod::into_backbone(model);
        let features = backbone.forward_features(Tensor::ones([1, 3, 32, 32], &device));
        assert_eq!(features.dims(), [1, 64]);
    }
}
