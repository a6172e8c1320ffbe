//! # Method Registry
//!
//! Every benchmarked method is one entry of [`MethodKind`]: a model
//! constructor (the per-method modules in this directory), a
//! [`MultiViewTransform`], and an optimizer recipe. The benchmark
//! pipeline looks methods up here and never special-cases them
//! anywhere else.

pub mod barlow_twins;
pub mod byol;
pub mod common;
pub mod dcl;
pub mod dino;
pub mod moco;
pub mod simclr;
pub mod swav;
pub mod vicreg;

use crate::data::MultiViewBatch;
use crate::models::resnet::ResNet;
use crate::transforms::MultiViewTransform;
use anyhow::bail;
use burn::module::{AutodiffModule, Module};
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use std::str::FromStr;

/// Progress information passed into training-step hooks.
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    /// Current epoch (0-based).
    pub epoch: usize,

    /// Total epochs.
    pub max_epochs: usize,

    /// Global step across epochs (0-based).
    pub global_step: usize,

    /// Total scheduled steps.
    pub total_steps: usize,
}

impl StepContext {
    /// Training progress in ``[0, 1]``.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            (self.global_step as f64 / self.total_steps as f64).min(1.0)
        }
    }
}

/// Output of one pretraining step.
#[derive(Debug)]
pub struct PretrainOutput<B: AutodiffBackend> {
    /// Total loss to backpropagate.
    pub loss: Tensor<B, 1>,

    /// Detached method-loss value, for logging.
    pub method_loss: f64,

    /// Detached online-classifier loss value, for logging.
    pub classifier_loss: f64,
}

impl<B: AutodiffBackend> PretrainOutput<B> {
    /// Combine a method loss and an online-classifier loss.
    pub fn new(
        method_loss: Tensor<B, 1>,
        classifier_loss: Tensor<B, 1>,
    ) -> Self {
        let method_value: f64 = method_loss.clone().into_scalar().elem();
        let classifier_value: f64 = classifier_loss.clone().into_scalar().elem();
        Self {
            loss: method_loss + classifier_loss,
            method_loss: method_value,
            classifier_loss: classifier_value,
        }
    }
}

/// Inference-side view of a method model: backbone features plus the
/// online classifier head. Implemented for every backend so the valid
/// (inner-backend) module can drive validation and k-NN extraction.
pub trait RepresentationModel<B: Backend>: Module<B> {
    /// Pooled backbone features for a batch of images.
    fn features(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2>;

    /// Online-classifier logits for a batch of features.
    fn classify(
        &self,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2>;
}

/// A pretrainable self-supervised method.
pub trait SslMethod<B: AutodiffBackend>:
    AutodiffModule<B> + RepresentationModel<B> + Sized
{
    /// One training step over a multi-view batch.
    ///
    /// Takes `&mut self` so methods can update their non-gradient
    /// buffers (negative queues, centers) in place.
    fn pretrain_step(
        &mut self,
        batch: MultiViewBatch<B>,
        ctx: &StepContext,
    ) -> PretrainOutput<B>;

    /// Hook run after each optimizer step (EMA targets, prototype
    /// renormalization).
    fn post_step(
        &mut self,
        _ctx: &StepContext,
    ) {
    }

    /// Consume the model into its pretrained backbone.
    fn into_backbone(self) -> ResNet<B>;
}

/// Optimizer recipe of a method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerRecipe {
    /// LARS with square-root batch-size scaling.
    Lars {
        /// Base LR before scaling.
        base_lr: f64,
    },

    /// SGD with linear batch-size scaling.
    Sgd {
        /// Base LR at batch 256.
        base_lr: f64,
    },

    /// AdamW with linear batch-size scaling.
    AdamW {
        /// Base LR at batch 256.
        base_lr: f64,
    },
}

impl OptimizerRecipe {
    /// Peak learning rate for a per-device batch size.
    pub fn peak_lr(
        &self,
        batch_size: usize,
    ) -> f64 {
        match self {
            Self::Lars { base_lr } => crate::optim::sqrt_scaled_lr(*base_lr, batch_size),
            Self::Sgd { base_lr } | Self::AdamW { base_lr } => {
                base_lr * batch_size as f64 / 256.0
            }
        }
    }
}

/// The registered methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// SimCLR with the 2-layer projection head.
    Simclr,

    /// SimCLR with the deeper 3-layer, 512-d head.
    SimclrV2,

    /// Decoupled contrastive learning.
    Dcl,

    /// DCL with von Mises–Fisher negative weighting.
    Dclw,

    /// Bootstrap-your-own-latent.
    Byol,

    /// Momentum contrast (v2 heads and augmentations).
    Moco,

    /// Multi-crop self-distillation.
    Dino,

    /// Online clustering with Sinkhorn assignments.
    Swav,

    /// Cross-correlation redundancy reduction.
    BarlowTwins,

    /// Variance-invariance-covariance regularization.
    VicReg,
}

impl MethodKind {
    /// Every registered method, in benchmark order.
    pub fn all() -> &'static [MethodKind] {
        &[
            Self::Simclr,
            Self::SimclrV2,
            Self::Dcl,
            Self::Dclw,
            Self::Byol,
            Self::Moco,
            Self::Dino,
            Self::Swav,
            Self::BarlowTwins,
            Self::VicReg,
        ]
    }

    /// Registry name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simclr => "simclr",
            Self::SimclrV2 => "simclrv2",
            Self::Dcl => "dcl",
            Self::Dclw => "dclw",
            Self::Byol => "byol",
            Self::Moco => "moco",
            Self::Dino => "dino",
            Self::Swav => "swav",
            Self::BarlowTwins => "barlowtwins",
            Self::VicReg => "vicreg",
        }
    }

    /// The method's view pipeline.
    pub fn transform(&self) -> MultiViewTransform {
        match self {
            Self::Simclr | Self::SimclrV2 | Self::Dcl | Self::Dclw | Self::Moco => {
                MultiViewTransform::contrastive_pair(224)
            }
            Self::Byol | Self::BarlowTwins | Self::VicReg => {
                MultiViewTransform::asymmetric_pair(224)
            }
            Self::Dino => MultiViewTransform::multi_crop(224, 96, 2, 6, (0.4, 1.0), (0.05, 0.4)),
            Self::Swav => MultiViewTransform::multi_crop(224, 96, 2, 6, (0.14, 1.0), (0.05, 0.14)),
        }
    }

    /// The method's optimizer recipe.
    pub fn optimizer_recipe(&self) -> OptimizerRecipe {
        match self {
            Self::Simclr | Self::SimclrV2 | Self::Dcl | Self::Dclw => {
                OptimizerRecipe::Lars { base_lr: 0.1 }
            }
            Self::Byol | Self::Swav | Self::BarlowTwins | Self::VicReg => {
                OptimizerRecipe::Lars { base_lr: 0.1 }
            }
            Self::Moco => OptimizerRecipe::Sgd { base_lr: 0.03 },
            Self::Dino => OptimizerRecipe::AdamW { base_lr: 5e-4 },
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MethodKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for kind in Self::all() {
            if kind.name() == s {
                return Ok(*kind);
            }
        }
        bail!(
            "unknown method {s:?}; registered methods: {}",
            Self::all()
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names_round_trip() {
        for kind in MethodKind::all() {
            let parsed: MethodKind = kind.name().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn test_unknown_method_is_reported() {
        let err = MethodKind::from_str("notamethod").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("notamethod"));
        assert!(msg.contains("simclr"));
    }

    #[test]
    fn test_every_method_has_transform_and_recipe() {
        for kind in MethodKind::all() {
            let transform = kind.transform();
            assert!(transform.num_views() >= 2, "{kind} has too few views");

            let lr = kind.optimizer_recipe().peak_lr(256);
            assert!(lr > 0.0, "{kind} has a degenerate learning rate");
        }
    }

    #[test]
    fn test_multi_crop_methods_lead_with_global_views() {
        for kind in [MethodKind::Dino, MethodKind::Swav] {
            let transform = kind.transform();
            assert_eq!(transform.num_views(), 8);
            assert_eq!(transform.views[0].size, 224);
            assert_eq!(transform.views[1].size, 224);
            assert_eq!(transform.views[2].size, 96);
        }
    }

    #[test]
    fn test_step_context_progress() {
        let ctx = StepContext {
            epoch: 1,
            max_epochs: 4,
            global_step: 50,
            total_steps: 100,
        };
        assert!((ctx.progress() - 0.5).abs() < 1e-12);

        let done = StepContext {
            epoch: 4,
            max_epochs: 4,
            global_step: 400,
            total_steps: 100,
        };
        assert!((done.progress() - 1.0).abs() < 1e-12);
    }
}
