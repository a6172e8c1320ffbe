//! # VICReg
//!
//! Twin views through a wide expander; the loss balances invariance
//! against per-dimension variance and covariance regularizers.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::vicreg::VicRegLoss;
use crate::methods::common::{OnlineClassifier, OnlineClassifierConfig};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::module::Ignored;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// [`VicReg`] Config.
#[derive(Config, Debug)]
pub struct VicRegConfig {
    /// Backbone config.
    pub backbone: ResNetConfig,

    /// Number of classes for the online classifier.
    pub num_classes: usize,

    /// Expander width (all three layers).
    #[config(default = 8192)]
    pub expander_dim: usize,
}

impl VicRegConfig {
    /// Initialize a [`VicReg`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> VicReg<B> {
        let feature_dim = self.backbone.feature_dim();
        VicReg {
            backbone: self.backbone.init(device),
            projection_head: MlpHeadConfig::batch_norm_mlp(&[
                feature_dim,
                self.expander_dim,
                self.expander_dim,
                self.expander_dim,
            ])
            .init(device),
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            criterion: Ignored(VicRegLoss::default()),
        }
    }
}

/// VICReg model.
#[derive(Module, Debug)]
pub struct VicReg<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,
    online_classifier: OnlineClassifier<B>,
    criterion: Ignored<VicRegLoss>,
}

impl<B: Backend> RepresentationModel<B> for VicReg<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for VicReg<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        _ctx: &StepContext,
    ) -> PretrainOutput<B> {
        let [v0, v1] = <[Tensor<B, 4>; 2]>::try_from(batch.views)
            .expect("variance regularization takes exactly two views");

        let f0 = self.backbone.forward_features(v0);
        let f1 = self.backbone.forward_features(v1);

        let z0 = self.projection_head.forward(f0.clone());
        let z1 = self.projection_head.forward(f1);

        let method_loss = self.criterion.0.forward(z0, z1);
        let classifier_loss = self.online_classifier.loss(f0.detach(), batch.targets);

        PretrainOutput::new(method_loss, classifier_loss)
    }

    fn into_backbone(self) -> ResNet<B> {
        self.backbone
    }
}
