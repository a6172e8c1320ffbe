//! # Linear-Probe and Fine-Tune Protocols
//!
//! Supervised classification on top of a pretrained backbone, run
//! through ``burn``'s `Learner`: frozen backbone + linear head for the
//! probe, everything trainable at a lower rate for fine-tuning.

use crate::data::{EvalBatcher, ImageFolder};
use crate::eval::{AccuracyCounter, ClassificationMetrics};
use crate::models::resnet::{ResNet, ResNetMeta};
use crate::optim::WarmupCosineSchedulerConfig;
use crate::transforms::EvalTransform;
use anyhow::Context;
use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Linear, LinearConfig};
use burn::optim::SgdConfig;
use burn::optim::momentum::MomentumConfig;
use burn::module::AutodiffModule;
use burn::prelude::{Backend, Int, Module, Tensor};
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{AccuracyMetric, LossMetric};
use burn::train::{ClassificationOutput, LearnerBuilder, TrainOutput, TrainStep, ValidStep};
use std::path::Path;

use crate::data::ClassificationBatch;

/// Probe protocol parameters.
#[derive(Config, Debug)]
pub struct ProbeConfig {
    /// Number of classes.
    pub num_classes: usize,

    /// Training epochs.
    #[config(default = 90)]
    pub epochs: usize,

    /// Base LR at batch 256 (linearly scaled).
    #[config(default = 0.1)]
    pub base_lr: f64,

    /// Keep the backbone frozen.
    #[config(default = true)]
    pub freeze_backbone: bool,
}

impl ProbeConfig {
    /// The linear-probe protocol.
    pub fn linear(num_classes: usize) -> Self {
        Self::new(num_classes)
    }

    /// The fine-tune protocol: unfrozen backbone, shorter schedule,
    /// a tenth of the probe rate.
    pub fn finetune(num_classes: usize) -> Self {
        Self::new(num_classes)
            .with_freeze_backbone(false)
            .with_epochs(30)
            .with_base_lr(0.01)
    }
}

/// A backbone with a single linear classification head.
#[derive(Module, Debug)]
pub struct LinearProbe<B: Backend> {
    backbone: ResNet<B>,
    head: Linear<B>,
    freeze_backbone: bool,
}

impl<B: Backend> LinearProbe<B> {
    /// Wrap a pretrained backbone.
    pub fn new(
        backbone: ResNet<B>,
        num_classes: usize,
        freeze_backbone: bool,
        device: &B::Device,
    ) -> Self {
        let feature_dim = backbone.feature_dim();
        let backbone = if freeze_backbone {
            backbone.no_grad()
        } else {
            backbone
        };

        Self {
            backbone,
            head: LinearConfig::new(feature_dim, num_classes).init(device),
            freeze_backbone,
        }
    }

    /// Class logits for a batch of images.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.backbone.forward_features(images);
        let features = if self.freeze_backbone {
            features.detach()
        } else {
            features
        };
        self.head.forward(features)
    }

    /// Logits plus cross-entropy loss.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for LinearProbe<B>
{
    fn step(
        &self,
        batch: ClassificationBatch<B>,
    ) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ClassificationBatch<B>, ClassificationOutput<B>> for LinearProbe<B> {
    fn step(
        &self,
        batch: ClassificationBatch<B>,
    ) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// Train a probe and score it on the validation split.
#[allow(clippy::too_many_arguments)]
pub fn train_probe<B: AutodiffBackend>(
    backbone: ResNet<B>,
    train_dataset: ImageFolder,
    val_dataset: ImageFolder,
    config: &ProbeConfig,
    batch_size: usize,
    num_workers: usize,
    devices: Vec<B::Device>,
    artifact_dir: &Path,
) -> anyhow::Result<ClassificationMetrics> {
    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("creating {}", artifact_dir.display()))?;
    config
        .save(artifact_dir.join("config.json"))
        .context("saving probe config")?;

    let device = devices.first().cloned().unwrap_or_default();
    let model = LinearProbe::new(backbone, config.num_classes, config.freeze_backbone, &device);

    let optimizer = SgdConfig::new()
        .with_momentum(Some(MomentumConfig::new()))
        .init();

    let steps_per_epoch = train_dataset.len().div_ceil(batch_size).max(1);
    let scheduler = WarmupCosineSchedulerConfig::new(
        config.base_lr * batch_size as f64 / 256.0,
        config.epochs * steps_per_epoch,
    )
    .with_warmup_fraction(0.0)
    .init();

    let dataloader_train = DataLoaderBuilder::new(EvalBatcher::<B>::new(EvalTransform::default()))
        .batch_size(batch_size)
        .shuffle(42)
        .num_workers(num_workers)
        .build(train_dataset);

    let dataloader_valid =
        DataLoaderBuilder::new(EvalBatcher::<B::InnerBackend>::new(EvalTransform::default()))
            .batch_size(batch_size)
            .num_workers(num_workers)
            .build(val_dataset.clone());

    let artifact_str = artifact_dir.to_string_lossy().to_string();
    let learner = LearnerBuilder::new(&artifact_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .devices(devices)
        .num_epochs(config.epochs)
        .summary()
        .build(model, optimizer, scheduler);

    let trained = learner.fit(dataloader_train, dataloader_valid);

    // Score the final model explicitly so the stage reports the same
    // numbers it persists.
    let valid_model = trained.valid();
    let dataloader_score =
        DataLoaderBuilder::new(EvalBatcher::<B::InnerBackend>::new(EvalTransform::default()))
            .batch_size(batch_size)
            .num_workers(num_workers)
            .build(val_dataset);

    let mut counter = AccuracyCounter::new();
    for batch in dataloader_score.iter() {
        let logits = valid_model.forward(batch.images);
        counter.update(logits, batch.targets);
    }

    Ok(counter.metrics())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAutodiffBackend, TestBackend, tiny_resnet_config};
    use burn::tensor::Distribution;

    #[test]
    fn test_probe_presets() {
        let linear = ProbeConfig::linear(10);
        assert!(linear.freeze_backbone);
        assert_eq!(linear.epochs, 90);

        let finetune = ProbeConfig::finetune(10);
        assert!(!finetune.freeze_backbone);
        assert_eq!(finetune.epochs, 30);
        assert!(finetune.base_lr < linear.base_lr);
    }

    #[test]
    fn test_forward_classification_shapes() {
        let device = Default::default();
        let backbone = tiny_resnet_config().init::<TestBackend>(&device);
        let probe = LinearProbe::new(backbone, 5, true, &device);

        let images = Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 3].as_slice(), &device);

        let output = probe.forward_classification(images, targets);
        assert_eq!(output.output.dims(), [2, 5]);
        let loss: f32 = output.loss.into_scalar();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_frozen_probe_backbone_gets_no_gradients() {
        let device = Default::default();
        let backbone = tiny_resnet_config().init::<TestAutodiffBackend>(&device);
        let probe = LinearProbe::new(backbone, 5, true, &device);

        let images = Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let targets =
            Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 3].as_slice(), &device);

        let output = probe.forward_classification(images, targets);
        let grads = output.loss.backward();
        let grads = burn::optim::GradientsParams::from_grads(grads, &probe);

        // Only the head's weight and bias carry gradients.
        assert_eq!(grads.len(), 2);
    }

    #[test]
    fn test_unfrozen_probe_backbone_gets_gradients() {
        let device = Default::default();
        let backbone = tiny_resnet_config().init::<TestAutodiffBackend>(&device);
        let probe = LinearProbe::new(backbone, 5, false, &device);

        let images = Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let targets =
            Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 3].as_slice(), &device);

        let output = probe.forward_classification(images, targets);
        let grads = output.loss.backward();
        let grads = burn::optim::GradientsParams::from_grads(grads, &probe);
        assert!(grads.len() > 2);
    }
}
