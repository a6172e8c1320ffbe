//! # DCL / DCLW
//!
//! SimCLR's twin-view setup with the decoupled contrastive loss; the
//! weighted variant differs only in the positive-term weighting.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::dcl::DclLoss;
use crate::methods::common::{OnlineClassifier, OnlineClassifierConfig};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// [`Dcl`] Config.
#[derive(Config, Debug)]
pub struct DclConfig {
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

    /// Loss temperature.
    #[config(default = 0.1)]
    pub temperature: f64,

    /// von Mises–Fisher concentration; enables the weighted variant.
    #[config(default = "None")]
    pub sigma: Option<f64>,
}

impl DclConfig {
    /// The weighted (DCLW) variant.
    pub fn weighted(
        backbone: ResNetConfig,
        num_classes: usize,
    ) -> Self {
        Self::new(backbone, num_classes).with_sigma(Some(0.5))
    }

    /// Initialize a [`Dcl`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Dcl<B> {
        let feature_dim = self.backbone.feature_dim();
        Dcl {
            backbone: self.backbone.init(device),
            projection_head: MlpHeadConfig::batch_norm_mlp(&[
                feature_dim,
                self.hidden_dim,
                self.output_dim,
            ])
            .init(device),
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            temperature: self.temperature,
            sigma: self.sigma,
        }
    }
}

/// DCL model.
#[derive(Module, Debug)]
pub struct Dcl<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,
    online_classifier: OnlineClassifier<B>,
    temperature: f64,
    sigma: Option<f64>,
}

impl<B: Backend> RepresentationModel<B> for Dcl<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for Dcl<B> {
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

        let criterion = match self.sigma {
            None => DclLoss::new(self.temperature),
            Some(sigma) => DclLoss::weighted(self.temperature, sigma),
        };
        let method_loss = criterion.forward(z0, z1);
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
    fn test_weighted_preset() {
        let config = DclConfig::weighted(tiny_resnet_config(), 4);
        assert_eq!(config.sigma, Some(0.5));
    }

    #[test]
    fn test_pretrain_step_both_variants() {
        let device = Default::default();
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 1,
        };

        for sigma in [None, Some(0.5)] {
            let mut model: Dcl<TestAutodiffBackend> = DclConfig::new(tiny_resnet_config(), 4)
                .with_hidden_dim(32)
                .with_output_dim(16)
                .with_sigma(sigma)
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
            let _grads = output.loss.backward();
        }
    }
}
