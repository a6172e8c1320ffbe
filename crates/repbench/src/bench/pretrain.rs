//! # Self-Supervised Pretraining Loop
//!
//! A manual train/validate loop rather than a `Learner` fit: methods
//! need per-step hooks (EMA targets, queues, centers) between the
//! optimizer step and the next batch.

use crate::data::{EvalBatcher, ImageFolder, MultiViewBatcher};
use crate::eval::AccuracyCounter;
use crate::methods::{RepresentationModel, SslMethod, StepContext};
use crate::transforms::{EvalTransform, MultiViewTransform};
use anyhow::{Context, bail};
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::lr_scheduler::LrScheduler;
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Loop parameters.
#[derive(Debug, Clone)]
pub struct PretrainOptions {
    /// Per-device batch size.
    pub batch_size: usize,

    /// Training epochs.
    pub epochs: usize,

    /// Dataloader workers.
    pub num_workers: usize,

    /// Shuffle seed.
    pub seed: u64,

    /// Checkpoint cadence in epochs.
    pub checkpoint_every: usize,
}

/// One epoch's logged metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch index (0-based).
    pub epoch: usize,

    /// Mean total train loss.
    pub train_loss: f64,

    /// Mean method loss.
    pub method_loss: f64,

    /// Mean online-classifier loss.
    pub classifier_loss: f64,

    /// Online-classifier top-1 on the validation split.
    pub val_online_top1: f64,

    /// Online-classifier top-5 on the validation split.
    pub val_online_top5: f64,
}

/// Full pretraining history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PretrainReport {
    /// Per-epoch metrics.
    pub epochs: Vec<EpochMetrics>,
}

impl PretrainReport {
    /// Best online-classifier top-1 across epochs.
    pub fn best_online_top1(&self) -> f64 {
        self.epochs
            .iter()
            .map(|e| e.val_online_top1)
            .fold(0.0, f64::max)
    }

    /// Best online-classifier top-5 across epochs.
    pub fn best_online_top5(&self) -> f64 {
        self.epochs
            .iter()
            .map(|e| e.val_online_top5)
            .fold(0.0, f64::max)
    }
}

/// Pretrain a method model.
///
/// Runs `options.epochs` epochs over the multi-view loader, validates
/// the online classifier each epoch, checkpoints the model, and keeps
/// `metrics.json` in `artifact_dir` current.
#[allow(clippy::too_many_arguments)]
pub fn pretrain<B, M, O, S>(
    mut model: M,
    mut optimizer: O,
    mut scheduler: S,
    transform: MultiViewTransform,
    train_dataset: ImageFolder,
    val_dataset: ImageFolder,
    options: &PretrainOptions,
    artifact_dir: &Path,
) -> anyhow::Result<(M, PretrainReport)>
where
    B: AutodiffBackend,
    M: SslMethod<B>,
    M::InnerModule: RepresentationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
    S: LrScheduler,
{
    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("creating {}", artifact_dir.display()))?;

    let steps_per_epoch = train_dataset.len().div_ceil(options.batch_size).max(1);
    let total_steps = steps_per_epoch * options.epochs;

    let dataloader_train = DataLoaderBuilder::new(MultiViewBatcher::<B>::new(transform))
        .batch_size(options.batch_size)
        .shuffle(options.seed)
        .num_workers(options.num_workers)
        .build(train_dataset);

    let dataloader_valid =
        DataLoaderBuilder::new(EvalBatcher::<B::InnerBackend>::new(EvalTransform::default()))
            .batch_size(options.batch_size)
            .num_workers(options.num_workers)
            .build(val_dataset);

    let mut report = PretrainReport::default();
    let mut global_step = 0usize;

    for epoch in 0..options.epochs {
        let mut loss_sum = 0.0f64;
        let mut method_sum = 0.0f64;
        let mut classifier_sum = 0.0f64;
        let mut batches = 0usize;

        for batch in dataloader_train.iter() {
            let ctx = StepContext {
                epoch,
                max_epochs: options.epochs,
                global_step,
                total_steps,
            };

            let output = model.pretrain_step(batch, &ctx);
            if !output.method_loss.is_finite() {
                bail!("training loss diverged at epoch {epoch} step {global_step}");
            }

            loss_sum += output.method_loss + output.classifier_loss;
            method_sum += output.method_loss;
            classifier_sum += output.classifier_loss;
            batches += 1;

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            let lr = scheduler.step();
            model = optimizer.step(lr, model, grads);
            model.post_step(&ctx);

            global_step += 1;
        }

        // Online-classifier validation on the inner (no-autodiff) model.
        let valid_model = model.valid();
        let mut counter = AccuracyCounter::new();
        for batch in dataloader_valid.iter() {
            let logits = valid_model.classify(valid_model.features(batch.images));
            counter.update(logits, batch.targets);
        }
        let val_metrics = counter.metrics();

        let denom = batches.max(1) as f64;
        let epoch_metrics = EpochMetrics {
            epoch,
            train_loss: loss_sum / denom,
            method_loss: method_sum / denom,
            classifier_loss: classifier_sum / denom,
            val_online_top1: val_metrics.top1,
            val_online_top5: val_metrics.top5,
        };
        tracing::info!(
            "epoch {}/{}: loss {:.4} (method {:.4}, classifier {:.4}), \
             val_online_top1 {:.4}, val_online_top5 {:.4}",
            epoch + 1,
            options.epochs,
            epoch_metrics.train_loss,
            epoch_metrics.method_loss,
            epoch_metrics.classifier_loss,
            epoch_metrics.val_online_top1,
            epoch_metrics.val_online_top5,
        );
        report.epochs.push(epoch_metrics);

        let metrics_json =
            serde_json::to_string_pretty(&report).context("serializing metrics")?;
        std::fs::write(artifact_dir.join("metrics.json"), metrics_json)
            .context("writing metrics.json")?;

        let last = epoch + 1 == options.epochs;
        if last || (epoch + 1) % options.checkpoint_every == 0 {
            model
                .clone()
                .save_file(
                    artifact_dir.join(format!("checkpoint-{epoch}")),
                    &CompactRecorder::new(),
                )
                .context("saving checkpoint")?;
        }
    }

    tracing::info!(
        "max val_online_top1: {:.4}, max val_online_top5: {:.4}",
        report.best_online_top1(),
        report.best_online_top5(),
    );

    Ok((model, report))
}
