//! # Benchmark Orchestration
//!
//! The driver the CLI calls into: resolve each requested method in the
//! registry, pretrain (or load) its model, then run the evaluation
//! stages in order, skipping what's flagged.

pub mod pretrain;

use crate::bench::pretrain::{PretrainOptions, pretrain};
use crate::data::ImageFolder;
use crate::eval::knn::{KnnEvalConfig, knn_eval};
use crate::eval::probe::{ProbeConfig, train_probe};
use crate::eval::transfer::transfer_eval;
use crate::methods::barlow_twins::BarlowTwinsConfig;
use crate::methods::byol::ByolConfig;
use crate::methods::dcl::DclConfig;
use crate::methods::dino::DinoConfig;
use crate::methods::moco::MocoConfig;
use crate::methods::simclr::SimclrConfig;
use crate::methods::swav::SwavConfig;
use crate::methods::vicreg::VicRegConfig;
use crate::methods::{MethodKind, RepresentationModel, SslMethod};
use crate::models::resnet::ResNetConfig;
use crate::optim::{LarsConfig, WarmupCosineSchedulerConfig};
use anyhow::Context;
use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamWConfig, Optimizer, SgdConfig};
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Benchmark run configuration.
#[derive(Config, Debug)]
pub struct BenchmarkConfig {
    /// Pretraining/eval training split root.
    pub train_dir: PathBuf,

    /// Validation split root.
    pub val_dir: PathBuf,

    /// Root for logs, checkpoints, and metrics.
    pub log_dir: PathBuf,

    /// Root holding transfer datasets.
    #[config(default = "None")]
    pub transfer_dir: Option<PathBuf>,

    /// Per-device batch size.
    #[config(default = 128)]
    pub batch_size_per_device: usize,

    /// Pretraining epochs; 0 skips pretraining.
    #[config(default = 100)]
    pub epochs: usize,

    /// Dataloader workers.
    #[config(default = 4)]
    pub num_workers: usize,

    /// Number of classes in the pretraining dataset.
    #[config(default = 100)]
    pub num_classes: usize,

    /// Backend seed.
    #[config(default = 42)]
    pub seed: u64,

    /// Checkpoint to load before (or instead of) pretraining.
    #[config(default = "None")]
    pub ckpt_path: Option<PathBuf>,

    /// Methods to run; empty means the whole registry.
    #[config(default = "Vec::new()")]
    pub methods: Vec<String>,

    /// Skip the k-NN evaluation stage.
    #[config(default = false)]
    pub skip_knn_eval: bool,

    /// Skip the linear-probe stage.
    #[config(default = false)]
    pub skip_linear_eval: bool,

    /// Skip the fine-tune stage.
    #[config(default = false)]
    pub skip_finetune_eval: bool,

    /// Skip the transfer tasks.
    #[config(default = false)]
    pub skip_transfer_tasks: bool,
}

impl BenchmarkConfig {
    /// Resolve the method list against the registry.
    pub fn resolve_methods(&self) -> anyhow::Result<Vec<MethodKind>> {
        if self.methods.is_empty() {
            return Ok(MethodKind::all().to_vec());
        }
        self.methods.iter().map(|name| name.parse()).collect()
    }
}

fn write_json<T: Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("serializing metrics")?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn timestamp_dir() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("run-{secs}")
}

/// Run the benchmark over every resolved method.
pub fn run_benchmark<B: AutodiffBackend>(
    config: &BenchmarkConfig,
    devices: Vec<B::Device>,
) -> anyhow::Result<()> {
    B::seed(config.seed);

    let methods = config.resolve_methods()?;
    tracing::info!(
        "benchmarking methods: {}",
        methods
            .iter()
            .map(|m| m.name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    for kind in methods {
        let method_dir = config.log_dir.join(kind.name()).join(timestamp_dir());
        run_method::<B>(kind, config, devices.clone(), &method_dir)
            .with_context(|| format!("method {kind} failed"))?;
    }
    Ok(())
}

/// Construct the method's model and optimizer, then run the pipeline.
fn run_method<B: AutodiffBackend>(
    kind: MethodKind,
    config: &BenchmarkConfig,
    devices: Vec<B::Device>,
    method_dir: &Path,
) -> anyhow::Result<()> {
    tracing::info!("running {kind} into {}", method_dir.display());

    let device = devices.first().cloned().unwrap_or_default();
    let backbone = ResNetConfig::resnet50();
    let classes = config.num_classes;

    match kind {
        MethodKind::Simclr => {
            let model = SimclrConfig::new(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::SimclrV2 => {
            let model = SimclrConfig::v2(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::Dcl => {
            let model = DclConfig::new(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::Dclw => {
            let model = DclConfig::weighted(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::Byol => {
            let model = ByolConfig::new(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::Moco => {
            let model = MocoConfig::new(backbone, classes).init::<B>(&device);
            let optimizer = SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new()))
                .with_weight_decay(Some(WeightDecayConfig::new(1e-4)))
                .init();
            run_pipeline(model, optimizer, kind, config, devices, method_dir)
        }
        MethodKind::Dino => {
            let model = DinoConfig::new(backbone, classes).init::<B>(&device);
            let optimizer = AdamWConfig::new().with_weight_decay(0.04).init();
            run_pipeline(model, optimizer, kind, config, devices, method_dir)
        }
        MethodKind::Swav => {
            let model = SwavConfig::new(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::BarlowTwins => {
            let model = BarlowTwinsConfig::new(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
        MethodKind::VicReg => {
            let model = VicRegConfig::new(backbone, classes).init::<B>(&device);
            run_pipeline(model, LarsConfig::new().init(), kind, config, devices, method_dir)
        }
    }
}

/// Pretrain (or load) a model, then run the evaluation stages.
fn run_pipeline<B, M, O>(
    model: M,
    optimizer: O,
    kind: MethodKind,
    config: &BenchmarkConfig,
    devices: Vec<B::Device>,
    method_dir: &Path,
) -> anyhow::Result<()>
where
    B: AutodiffBackend,
    M: SslMethod<B>,
    M::InnerModule: RepresentationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let device = devices.first().cloned().unwrap_or_default();

    // The run configuration lands next to the pretrain artifacts so a
    // run can be reproduced from its directory alone.
    let pretrain_dir = method_dir.join("pretrain");
    std::fs::create_dir_all(&pretrain_dir)
        .with_context(|| format!("creating {}", pretrain_dir.display()))?;
    config
        .save(pretrain_dir.join("config.json"))
        .context("saving benchmark config")?;

    let train_dataset = ImageFolder::scan(&config.train_dir).context("scanning train dir")?;
    let val_dataset = ImageFolder::scan(&config.val_dir).context("scanning val dir")?;

    // Checkpoint first: with epochs == 0 it replaces pretraining,
    // otherwise it resumes.
    let mut model = model;
    if let Some(ckpt) = &config.ckpt_path {
        tracing::info!("loading checkpoint {}", ckpt.display());
        model = model
            .load_file(ckpt.clone(), &CompactRecorder::new(), &device)
            .with_context(|| format!("loading checkpoint {}", ckpt.display()))?;
    }

    let model = if config.epochs == 0 {
        tracing::info!("epochs == 0, skipping pretraining");
        model
    } else {
        tracing::info!("pretraining {kind}...");

        let recipe = kind.optimizer_recipe();
        let peak_lr = recipe.peak_lr(config.batch_size_per_device);
        let steps_per_epoch = train_dataset
            .len()
            .div_ceil(config.batch_size_per_device)
            .max(1);
        let scheduler =
            WarmupCosineSchedulerConfig::new(peak_lr, config.epochs * steps_per_epoch).init();

        let options = PretrainOptions {
            batch_size: config.batch_size_per_device,
            epochs: config.epochs,
            num_workers: config.num_workers,
            seed: config.seed,
            checkpoint_every: 10,
        };
        let (model, _report) = pretrain(
            model,
            optimizer,
            scheduler,
            kind.transform(),
            train_dataset.clone(),
            val_dataset.clone(),
            &options,
            &pretrain_dir,
        )?;
        model
    };

    if config.skip_knn_eval {
        tracing::info!("skipping k-NN eval");
    } else {
        tracing::info!("k-NN eval for {kind}...");
        let metrics = knn_eval(
            &model.valid(),
            train_dataset.clone(),
            val_dataset.clone(),
            &KnnEvalConfig::new()
                .with_batch_size(config.batch_size_per_device)
                .with_num_workers(config.num_workers),
        );
        tracing::info!("k-NN top1 {:.4} top5 {:.4}", metrics.top1, metrics.top5);
        write_json(&method_dir.join("knn").join("metrics.json"), &metrics)?;
    }

    let backbone = model.into_backbone();

    if config.skip_linear_eval {
        tracing::info!("skipping linear eval");
    } else {
        tracing::info!("linear eval for {kind}...");
        let metrics = train_probe(
            backbone.clone(),
            train_dataset.clone(),
            val_dataset.clone(),
            &ProbeConfig::linear(config.num_classes),
            config.batch_size_per_device,
            config.num_workers,
            devices.clone(),
            &method_dir.join("linear"),
        )?;
        tracing::info!("linear top1 {:.4} top5 {:.4}", metrics.top1, metrics.top5);
        write_json(&method_dir.join("linear").join("metrics.json"), &metrics)?;
    }

    if config.skip_finetune_eval {
        tracing::info!("skipping fine-tune eval");
    } else {
        tracing::info!("fine-tune eval for {kind}...");
        let metrics = train_probe(
            backbone.clone(),
            train_dataset,
            val_dataset,
            &ProbeConfig::finetune(config.num_classes),
            config.batch_size_per_device,
            config.num_workers,
            devices.clone(),
            &method_dir.join("finetune"),
        )?;
        tracing::info!("fine-tune top1 {:.4} top5 {:.4}", metrics.top1, metrics.top5);
        write_json(&method_dir.join("finetune").join("metrics.json"), &metrics)?;
    }

    if config.skip_transfer_tasks {
        tracing::info!("skipping transfer tasks");
    } else if let Some(transfer_dir) = &config.transfer_dir {
        tracing::info!("transfer tasks for {kind}...");
        let results = transfer_eval(
            &backbone,
            transfer_dir,
            config.batch_size_per_device,
            config.num_workers,
            devices,
            &method_dir.join("transfer"),
        )?;
        write_json(&method_dir.join("transfer").join("results.json"), &results)?;
    } else {
        tracing::info!("no transfer dir configured, skipping transfer tasks");
    }

    // Persist the final backbone for downstream use.
    backbone
        .save_file(pretrain_dir.join("backbone"), &CompactRecorder::new())
        .context("saving backbone")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::OptimizerRecipe;

    fn config() -> BenchmarkConfig {
        BenchmarkConfig::new(
            PathBuf::from("/data/train"),
            PathBuf::from("/data/val"),
            PathBuf::from("/tmp/logs"),
        )
    }

    #[test]
    fn test_resolve_methods_defaults_to_registry() {
        let resolved = config().resolve_methods().unwrap();
        assert_eq!(resolved.len(), MethodKind::all().len());
    }

    #[test]
    fn test_resolve_methods_preserves_order() {
        let resolved = config()
            .with_methods(vec!["vicreg".into(), "simclr".into()])
            .resolve_methods()
            .unwrap();
        assert_eq!(resolved, vec![MethodKind::VicReg, MethodKind::Simclr]);
    }

    #[test]
    fn test_resolve_methods_rejects_unknown() {
        let err = config()
            .with_methods(vec!["simclr".into(), "bogus".into()])
            .resolve_methods()
            .unwrap_err();
        assert!(format!("{err}").contains("bogus"));
    }

    #[test]
    fn test_config_round_trips_as_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let original = config()
            .with_epochs(5)
            .with_methods(vec!["byol".into()])
            .with_skip_knn_eval(true);
        original.save(&path).unwrap();

        let loaded = BenchmarkConfig::load(&path).unwrap();
        assert_eq!(loaded.epochs, 5);
        assert_eq!(loaded.methods, vec!["byol".to_string()]);
        assert!(loaded.skip_knn_eval);
        assert!(!loaded.skip_linear_eval);
    }

    #[test]
    fn test_recipe_lrs_match_methods() {
        assert_eq!(
            MethodKind::Moco.optimizer_recipe(),
            OptimizerRecipe::Sgd { base_lr: 0.03 }
        );
        assert_eq!(
            MethodKind::Dino.optimizer_recipe(),
            OptimizerRecipe::AdamW { base_lr: 5e-4 }
        );
        assert!(matches!(
            MethodKind::Simclr.optimizer_recipe(),
            OptimizerRecipe::Lars { .. }
        ));
    }
}
