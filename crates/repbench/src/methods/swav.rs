//! # SwAV
//!
//! Views are scored against a learned prototype bank; Sinkhorn–Knopp
//! balances the global-view assignments and every other view predicts
//! them. Prototype columns are renormalized to the unit sphere before
//! each step.

use crate::data::MultiViewBatch;
use crate::layers::mlp::{MlpHead, MlpHeadConfig};
use crate::loss::l2_normalize;
use crate::loss::swav::SwavLoss;
use crate::methods::common::{OnlineClassifier, OnlineClassifierConfig};
use crate::methods::{PretrainOutput, RepresentationModel, SslMethod, StepContext};
use crate::models::resnet::{ResNet, ResNetConfig, ResNetMeta};
use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// Number of global views leading a SwAV multi-crop batch.
pub const SWAV_GLOBAL_VIEWS: usize = 2;

/// [`Swav`] Config.
#[derive(Config, Debug)]
pub struct SwavConfig {
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

    /// Number of prototypes.
    #[config(default = 3000)]
    pub num_prototypes: usize,
}

impl SwavConfig {
    /// Initialize a [`Swav`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Swav<B> {
        let feature_dim = self.backbone.feature_dim();

        Swav {
            backbone: self.backbone.init(device),
            projection_head: MlpHeadConfig::batch_norm_mlp(&[
                feature_dim,
                self.hidden_dim,
                self.output_dim,
            ])
            .init(device),
            prototypes: LinearConfig::new(self.output_dim, self.num_prototypes)
                .with_bias(false)
                .init(device),
            online_classifier: OnlineClassifierConfig::new(feature_dim, self.num_classes)
                .init(device),
            criterion: Ignored(SwavLoss::default()),
        }
    }
}

/// SwAV model.
#[derive(Module, Debug)]
pub struct Swav<B: Backend> {
    backbone: ResNet<B>,
    projection_head: MlpHead<B>,
    prototypes: Linear<B>,

    online_classifier: OnlineClassifier<B>,
    criterion: Ignored<SwavLoss>,
}

impl<B: Backend> Swav<B> {
    /// Renormalize each prototype (weight column) to unit length.
    fn normalize_prototypes(&mut self) {
        self.prototypes.weight = self.prototypes.weight.clone().map(|w| {
            let norm = w
                .clone()
                .powf_scalar(2.0)
                .sum_dim(0)
                .sqrt()
                .clamp_min(1e-12);
            w / norm
        });
    }

    fn prototype_scores(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.backbone.forward_features(images);
        let z = l2_normalize(self.projection_head.forward(features));
        self.prototypes.forward(z)
    }
}

impl<B: Backend> RepresentationModel<B> for Swav<B> {
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

impl<B: AutodiffBackend> SslMethod<B> for Swav<B> {
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        _ctx: &StepContext,
    ) -> PretrainOutput<B> {
        assert!(
            batch.views.len() >= SWAV_GLOBAL_VIEWS,
            "swapped prediction needs two global views"
        );

        self.normalize_prototypes();

        let scores: Vec<Tensor<B, 2>> = batch
            .views
            .iter()
            .map(|v| self.prototype_scores(v.clone()))
            .collect();
        let (high_res, low_res) = scores.split_at(SWAV_GLOBAL_VIEWS);

        let method_loss = self.criterion.0.forward(high_res, low_res);

        let features = self
            .backbone
            .forward_features(batch.views[0].clone())
            .detach();
        let classifier_loss = self.online_classifier.loss(features, batch.targets);

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

    fn tiny_model() -> Swav<TestAutodiffBackend> {
        let device = Default::default();
        SwavConfig::new(tiny_resnet_config(), 4)
            .with_hidden_dim(32)
            .with_output_dim(16)
            .with_num_prototypes(24)
            .init(&device)
    }

    #[test]
    fn test_normalize_prototypes_unit_columns() {
        let mut model = tiny_model();
        model.normalize_prototypes();

        let norms = model
            .prototypes
            .weight
            .val()
            .powf_scalar(2.0)
            .sum_dim(0)
            .sqrt()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for n in norms {
            assert!((n - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_pretrain_step_multi_crop() {
        let device = Default::default();
        let ctx = StepContext {
            epoch: 0,
            max_epochs: 1,
            global_step: 0,
            total_steps: 1,
        };

        let global =
            |d: &_| Tensor::random([4, 3, 64, 64], Distribution::Normal(0.0, 1.0), d);
        let local = |d: &_| Tensor::random([4, 3, 32, 32], Distribution::Normal(0.0, 1.0), d);

        let mut model = tiny_model();
        let batch = MultiViewBatch {
            views: vec![global(&device), global(&device), local(&device)],
            targets: Tensor::<TestAutodiffBackend, 1, Int>::from_ints(
                [0, 1, 2, 3].as_slice(),
                &device,
            ),
        };

        let output = model.pretrain_step(batch, &ctx);
        assert!(output.method_loss.is_finite());
        assert!(output.method_loss > 0.0);
        let _grads = output.loss.backward();
    }
}
