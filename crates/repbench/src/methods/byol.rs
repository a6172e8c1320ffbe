//! # BYOL
//!
//! An online network (projection + prediction) chases an EMA target
//! network under negative cosine similarity; no negatives anywhere.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::negative_cosine::NegativeCosineSimilarity;
use crate::methods::common::{
    OnlineClassifier, OnlineClassifierConfig, cosine_momentum, ema_update,
};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// [`Byol`] Config.
#[derive(Config, Debug)]
pub struct ByolConfig {
    /// Backbone config.
    pub backbone: ResNetConfig,

    /// Number of classes for the online classifier.
    pub num_classes: usize,

    /// Projection/prediction hidden width.
    #[config(default = 4096)]
    pub hidden_dim: usize,

    /// Embedding width.
    #[config(default = 256)]
    pub output_dim: usize,

    /// Momentum at the start of training; cosine-ramped to 1.
    #[config(default = 0.996)]
    pub base_momentum: f64,
}

impl ByolConfig {
    /// Initialize a [`Byol`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Byol<B> {
        let feature_dim = self.backbone.feature_dim();

        let backbone = self.backbone.init(device);
        let projection_head = MlpHeadConfig::batch_norm_mlp(&[
            feature_dim,
            self.hidden_dim,
            self.output_dim,
        ])
        .init(device);

        // The target network starts as an exact copy; parameter ids
        // stay paired for the EMA update.
        let target_backbone = backbone.clone().no_grad();
        let target_projection_head = projection_head.clone().no_grad();

        Byol {
            backbone,
            projection_head,
            prediction_head: MlpHeadConfig::batch_norm_mlp(&[
                self.output_dim,
                self.hidden_dim,
                self.output_dim,
            ])
            .init(device),
            target_backbone,
            target_projection_head,
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            base_momentum: self.base_momentum,
        }
    }
}

/// BYOL model.
#[derive(Module, Debug)]
pub struct Byol<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,
    prediction_head: MlpHead<B>,

    target_backbone: ResNet<B>,
    target_projection_head: MlpHead<B>,

    online_classifier: OnlineClassifier<B>,
    base_momentum: f64,
}

impl<B: Backend> Byol<B> {
    fn predict(
        &self,
        images: Tensor<B, 4>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let features = self.backbone.forward_features(images);
        let prediction = self
            .prediction_head
            .forward(self.projection_head.forward(features.clone()));
        (features, prediction)
    }

    fn target_project(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.target_projection_head
            .forward(self.target_backbone.forward_features(images))
            .detach()
    }
}

impl<B: Backend> RepresentationModel<B> for Byol<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for Byol<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        _ctx: &StepContext,
    ) -> PretrainOutput<B> {
        let [v0, v1] = <[Tensor<B, 4>; 2]>::try_from(batch.views)
            .expect("asymmetric twins take exactly two views");

        let (f0, p0) = self.predict(v0.clone());
        let (_f1, p1) = self.predict(v1.clone());

        let t0 = self.target_project(v0);
        let t1 = self.target_project(v1);

        let criterion = NegativeCosineSimilarity;
        let method_loss =
            (criterion.forward(p0, t1) + criterion.forward(p1, t0)).div_scalar(2.0);

        let classifier_loss = self.online_classifier.loss(f0.detach(), batch.targets);

        PretrainOutput::new(method_loss, classifier_loss)
    }

    fn post_step(
        &mut self,
        ctx: &StepContext,
    ) {
        let tau = cosine_momentum(self.base_momentum, ctx.progress());
        self.target_backbone = ema_update(&self.backbone, self.target_backbone.clone(), tau);
        self.target_projection_head = ema_update(
            &self.projection_head,
            self.target_projection_head.clone(),
            tau,
        );
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

    fn tiny_model() -> Byol<TestAutodiffBackend> {
        let device = Default::default();
        ByolConfig::new(tiny_resnet_config(), 4)
            .with_hidden_dim(32)
            .with_output_dim(16)
            .init(&device)
    }

    fn tiny_batch() -> MultiViewBatch<TestAutodiffBackend> {
        let device = Default::default();
        MultiViewBatch {
            views: vec![
                Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device),
                Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device),
            ],
            targets: Tensor::<TestAutodiffBackend, 1, Int>::from_ints(
                [0, 1, 2, 3].as_slice(),
                &device,
            ),
        }
    }

    #[test]
    fn test_pretrain_step_loss_in_cosine_range() {
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 10,
        };

        let mut model = tiny_model();
        let output = model.pretrain_step(tiny_batch(), &ctx);

        // Mean negative cosine lives in [-1, 1].
        assert!(output.method_loss >= -1.0);
        assert!(output.method_loss <= 1.0);
        let _grads = output.loss.backward();
    }

    #[test]
    fn test_post_step_moves_target_toward_online() {
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 10,
        };

        let mut model = tiny_model();

        // Push the online projection head away from the target copy.
        let batch = tiny_batch();
        let output = model.pretrain_step(batch, &ctx);
        let grads = output.loss.backward();
        let grads =
            burn::optim::GradientsParams::from_grads(grads, &model);
        let mut optim = burn::optim::SgdConfig::new().init();
        model = burn::optim::Optimizer::step(&mut optim, 0.5, model, grads);

        let before: f32 = model
            .target_projection_head
            .layers[0]
            .linear
            .weight
            .val()
            .sub(model.projection_head.layers[0].linear.weight.val())
            .abs()
            .sum()
            .into_scalar();

        model.post_step(&ctx);

        let after: f32 = model
            .target_projection_head
            .layers[0]
            .linear
            .weight
            .val()
            .sub(model.projection_head.layers[0].linear.weight.val())
            .abs()
            .sum()
            .into_scalar();

        assert!(after < before, "EMA did not move target: {after} >= {before}");
    }
}
