//! # DINO
//!
//! Multi-crop self-distillation: a momentum teacher scores the global
//! views, the student predicts those assignments from every view, and
//! a running center keeps the teacher's outputs from collapsing.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::dino::DinoLoss;
use crate::loss::l2_normalize;
use crate::methods::common::{
    OnlineClassifier, OnlineClassifierConfig, cosine_momentum, ema_update,
};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// Number of global views leading a DINO multi-crop batch.
pub const DINO_GLOBAL_VIEWS: usize = 2;

/// [`Dino`] Config.
#[derive(Config, Debug)]
pub struct DinoConfig {
    /// Backbone config.
    pub backbone: ResNetConfig,

    /// Number of classes for the online classifier.
    pub num_classes: usize,

    /// Head hidden width.
    #[config(default = 2048)]
    pub hidden_dim: usize,

    /// Head bottleneck width.
    #[config(default = 256)]
    pub bottleneck_dim: usize,

    /// Number of output prototypes.
    #[config(default = 4096)]
    pub output_dim: usize,

    /// Teacher momentum at the start of training.
    #[config(default = 0.996)]
    pub base_momentum: f64,
}

impl DinoConfig {
    /// Initialize a [`Dino`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Dino<B> {
        let feature_dim = self.backbone.feature_dim();

        let backbone = self.backbone.init(device);
        let head = MlpHeadConfig::gelu_mlp(&[
            feature_dim,
            self.hidden_dim,
            self.hidden_dim,
            self.bottleneck_dim,
        ])
        .init(device);
        let prototypes = LinearConfig::new(self.bottleneck_dim, self.output_dim)
            .with_bias(false)
            .init(device);

        let teacher_backbone = backbone.clone().no_grad();
        let teacher_head = head.clone().no_grad();
        let teacher_prototypes = prototypes.clone().no_grad();

        Dino {
            backbone,
            head,
            prototypes,
            teacher_backbone,
            teacher_head,
            teacher_prototypes,
            center: Tensor::zeros([1, self.output_dim], device),
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            criterion: Ignored(DinoLoss::default()),
            base_momentum: self.base_momentum,
        }
    }
}

/// DINO model.
#[derive(Module, Debug)]
pub struct Dino<B: Backend> {
    backbone: ResNet<B>,
    head: MlpHead<B>,
    prototypes: Linear<B>,

    teacher_backbone: ResNet<B>,
    teacher_head: MlpHead<B>,
    teacher_prototypes: Linear<B>,

    /// Teacher-output running center, ``[1, output_dim]``.
    center: Tensor<B, 2>,

    online_classifier: OnlineClassifier<B>,
    criterion: Ignored<DinoLoss>,
    base_momentum: f64,
}

impl<B: Backend> Dino<B> {
    fn student_out(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.backbone.forward_features(images);
        let bottleneck = l2_normalize(self.head.forward(features));
        self.prototypes.forward(bottleneck)
    }

    fn teacher_out(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.teacher_backbone.forward_features(images);
        let bottleneck = l2_normalize(self.teacher_head.forward(features));
        self.teacher_prototypes.forward(bottleneck).detach()
    }
}

impl<B: Backend> RepresentationModel<B> for Dino<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for Dino<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        ctx: &StepContext,
    ) -> PretrainOutput<B> {
        assert!(
            batch.views.len() > DINO_GLOBAL_VIEWS,
            "multi-crop batch must carry local views"
        );

        let teacher_out: Vec<Tensor<B, 2>> = batch.views[..DINO_GLOBAL_VIEWS]
            .iter()
            .map(|v| self.teacher_out(v.clone()))
            .collect();
        let student_out: Vec<Tensor<B, 2>> = batch
            .views
            .iter()
            .map(|v| self.student_out(v.clone()))
            .collect();

        let method_loss = self.criterion.0.forward(
            &teacher_out,
            &student_out,
            self.center.clone().detach(),
            ctx.epoch,
        );

        self.center = self
            .criterion
            .0
            .update_center(
                self.center.clone().detach(),
                Tensor::cat(teacher_out, 0),
            )
            .detach();

        let features = self
            .backbone
            .forward_features(batch.views[0].clone())
            .detach();
        let classifier_loss = self.online_classifier.loss(features, batch.targets);

        PretrainOutput::new(method_loss, classifier_loss)
    }

    fn post_step(
        &mut self,
        ctx: &StepContext,
    ) {
        let tau = cosine_momentum(self.base_momentum, ctx.progress());
        self.teacher_backbone = ema_update(&self.backbone, self.teacher_backbone.clone(), tau);
        self.teacher_head = ema_update(&self.head, self.teacher_head.clone(), tau);
        self.teacher_prototypes =
            ema_update(&self.prototypes, self.teacher_prototypes.clone(), tau);
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

    fn tiny_model() -> Dino<TestAutodiffBackend> {
        let device = Default::default();
        DinoConfig::new(tiny_resnet_config(), 4)
            .with_hidden_dim(32)
            .with_bottleneck_dim(16)
            .with_output_dim(32)
            .init(&device)
    }

    fn multi_crop_batch() -> MultiViewBatch<TestAutodiffBackend> {
        let device = Default::default();
        let global =
            |d: &_| Tensor::random([2, 3, 64, 64], Distribution::Normal(0.0, 1.0), d);
        let local = |d: &_| Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), d);
        MultiViewBatch {
            views: vec![
                global(&device),
                global(&device),
                local(&device),
                local(&device),
            ],
            targets: Tensor::<TestAutodiffBackend, 1, Int>::from_ints(
                [0, 1].as_slice(),
                &device,
            ),
        }
    }

    #[test]
    fn test_pretrain_step_updates_center() {
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 2,
            global_step: 0,
            total_steps: 10,
        };

        let mut model = tiny_model();
        let center_before: f32 = model.center.clone().abs().sum().into_scalar();

        let output = model.pretrain_step(multi_crop_batch(), &ctx);
        assert!(output.method_loss.is_finite());
        assert!(output.method_loss > 0.0);

        let center_after: f32 = model.center.clone().abs().sum().into_scalar();
        assert!(
            (center_after - center_before).abs() > 0.0,
            "center never moved"
        );

        let _grads = output.loss.backward();
    }

    #[test]
    #[should_panic(expected = "multi-crop batch must carry local views")]
    fn test_two_view_batch_rejected() {
        let device = Default::default();
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 1,
        };

        let mut model = tiny_model();
        let batch = MultiViewBatch {
            views: vec![
                Tensor::random([2, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device),
                Tensor::random([2, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device),
            ],
            targets: Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 1].as_slice(), &device),
        };
        model.pretrain_step(batch, &ctx);
    }
}
