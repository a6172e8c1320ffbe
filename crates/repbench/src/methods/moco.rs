//! # MoCo
//!
//! Momentum contrast with the v2 projection head: a momentum-updated
//! key encoder fills a fixed-size queue of negatives for InfoNCE.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::l2_normalize;
use crate::loss::ntxent::QueueInfoNceLoss;
use crate::methods::common::{OnlineClassifier, OnlineClassifierConfig, ema_update};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::Distribution;
use burn::tensor::backend::AutodiffBackend;

/// [`Moco`] Config.
#[derive(Config, Debug)]
pub struct MocoConfig {
    /// Backbone config.
    pub backbone: ResNetConfig,

    /// Number of classes for the online classifier.
    pub num_classes: usize,

    /// Projection-head hidden width.
    #[config(default = 2048)]
    pub hidden_dim: usize,

    /// Embedding width.
    #[config(default = 128)]
    pub output_dim: usize,

    /// Negative queue length.
    #[config(default = 65536)]
    pub queue_size: usize,

    /// Key-encoder momentum.
    #[config(default = 0.999)]
    pub momentum: f64,

    /// InfoNCE temperature.
    #[config(default = 0.2)]
    pub temperature: f64,
}

impl MocoConfig {
    /// Initialize a [`Moco`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Moco<B> {
        let feature_dim = self.backbone.feature_dim();

        let backbone = self.backbone.init(device);
        let projection_head = MlpHeadConfig::batch_norm_mlp(&[
            feature_dim,
            self.hidden_dim,
            self.output_dim,
        ])
        .init(device);

        let key_backbone = backbone.clone().no_grad();
        let key_projection_head = projection_head.clone().no_grad();

        // Random unit keys keep early-step logits well conditioned.
        let queue = l2_normalize(Tensor::random(
            [self.queue_size, self.output_dim],
            Distribution::Normal(0.0, 1.0),
            device,
        ));

        Moco {
            backbone,
            projection_head,
            key_backbone,
            key_projection_head,
            queue,
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            momentum: self.momentum,
            temperature: self.temperature,
        }
    }
}

/// MoCo model.
#[derive(Module, Debug)]
pub struct Moco<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,

    key_backbone: ResNet<B>,
    key_projection_head: MlpHead<B>,

    /// Negative key queue, ``[queue_size, output_dim]``, newest first.
    queue: Tensor<B, 2>,

    online_classifier: OnlineClassifier<B>,
    momentum: f64,
    temperature: f64,
}

impl<B: Backend> Moco<B> {
    /// Current queue length.
    pub fn queue_size(&self) -> usize {
        self.queue.dims()[0]
    }

    fn enqueue(
        &mut self,
        keys: Tensor<B, 2>,
    ) {
        let size = self.queue_size();
        let queue = Tensor::cat(vec![keys, self.queue.clone()], 0);
        self.queue = queue.slice([0..size]).detach();
    }
}

impl<B: Backend> RepresentationModel<B> for Moco<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for Moco<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        _ctx: &StepContext,
    ) -> PretrainOutput<B> {
        let [v0, v1] = <[Tensor<B, 4>; 2]>::try_from(batch.views)
            .expect("momentum contrast takes exactly two views");

        let f0 = self.backbone.forward_features(v0);
        let query = self.projection_head.forward(f0.clone());

        let key = self
            .key_projection_head
            .forward(self.key_backbone.forward_features(v1))
            .detach();

        let method_loss = QueueInfoNceLoss::new(self.temperature).forward(
            query,
            key.clone(),
            self.queue.clone().detach(),
        );

        self.enqueue(l2_normalize(key));

        let classifier_loss = self.online_classifier.loss(f0.detach(), batch.targets);

        PretrainOutput::new(method_loss, classifier_loss)
    }

    fn post_step(
        &mut self,
        _ctx: &StepContext,
    ) {
        self.key_backbone = ema_update(&self.backbone, self.key_backbone.clone(), self.momentum);
        self.key_projection_head = ema_update(
            &self.projection_head,
            self.key_projection_head.clone(),
            self.momentum,
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
    use burn::tensor::Int;

    fn tiny_model() -> Moco<TestAutodiffBackend> {
        let device = Default::default();
        MocoConfig::new(tiny_resnet_config(), 4)
            .with_hidden_dim(32)
            .with_output_dim(16)
            .with_queue_size(64)
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
    fn test_queue_length_is_invariant() {
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 10,
        };

        let mut model = tiny_model();
        assert_eq!(model.queue_size(), 64);

        let before = model.queue.clone();
        let output = model.pretrain_step(tiny_batch(), &ctx);
        assert!(output.method_loss.is_finite());

        // Same capacity, new head entries.
        assert_eq!(model.queue_size(), 64);
        let moved: f32 = model
            .queue
            .clone()
            .slice([0..4])
            .sub(before.slice([0..4]))
            .abs()
            .sum()
            .into_scalar();
        assert!(moved > 0.0, "queue head was not replaced");
    }

    #[test]
    fn test_step_backward_ignores_key_encoder() {
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 10,
        };

        let mut model = tiny_model();
        let output = model.pretrain_step(tiny_batch(), &ctx);
        let _grads = output.loss.backward();
    }
}
