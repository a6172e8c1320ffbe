#![recursion_limit = "256"]
//! Benchmark CLI: parse the run configuration, pick a backend, and
//! hand off to the benchmark driver.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use repbench::bench::{BenchmarkConfig, run_benchmark};
use std::path::PathBuf;

/// Compute backend selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Accelerator {
    /// GPU via wgpu.
    Wgpu,

    /// CPU via ndarray.
    Ndarray,
}

/// Float precision selector (wgpu only).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    /// 32-bit floats.
    F32,

    /// 16-bit floats.
    F16,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "ResNet-50 self-supervised benchmarks", long_about = None)]
struct Args {
    /// Training split root (class-per-subdirectory).
    #[arg(long, default_value = "datasets/imagenet100/train")]
    train_dir: PathBuf,

    /// Validation split root.
    #[arg(long, default_value = "datasets/imagenet100/val")]
    val_dir: PathBuf,

    /// Root for logs, checkpoints, and metrics.
    #[arg(long, default_value = "benchmark_logs")]
    log_dir: PathBuf,

    /// Root holding transfer datasets (each with train/ and val/).
    #[arg(long)]
    transfer_dir: Option<PathBuf>,

    /// Batch size per device.
    #[arg(long, default_value_t = 128)]
    batch_size_per_device: usize,

    /// Pretraining epochs; 0 skips pretraining.
    #[arg(long, default_value_t = 100)]
    epochs: usize,

    /// Number of dataloader workers.
    #[arg(long, default_value_t = 4)]
    num_workers: usize,

    /// Compute backend.
    #[arg(long, value_enum, default_value_t = Accelerator::Wgpu)]
    accelerator: Accelerator,

    /// Number of devices.
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// Float precision (wgpu only).
    #[arg(long, value_enum, default_value_t = Precision::F32)]
    precision: Precision,

    /// Checkpoint to load before (or instead of) pretraining.
    #[arg(long)]
    ckpt_path: Option<PathBuf>,

    /// Methods to benchmark; defaults to the whole registry.
    #[arg(long, num_args = 1..)]
    methods: Vec<String>,

    /// Number of classes in the pretraining dataset.
    #[arg(long, default_value_t = 100)]
    num_classes: usize,

    /// Backend seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Skip the k-NN evaluation stage.
    #[arg(long)]
    skip_knn_eval: bool,

    /// Skip the linear-probe stage.
    #[arg(long)]
    skip_linear_eval: bool,

    /// Skip the fine-tune stage.
    #[arg(long)]
    skip_finetune_eval: bool,

    /// Skip the transfer tasks.
    #[arg(long)]
    skip_transfer_tasks: bool,
}

impl Args {
    fn to_config(&self) -> BenchmarkConfig {
        BenchmarkConfig::new(
            self.train_dir.clone(),
            self.val_dir.clone(),
            self.log_dir.clone(),
        )
        .with_transfer_dir(self.transfer_dir.clone())
        .with_batch_size_per_device(self.batch_size_per_device)
        .with_epochs(self.epochs)
        .with_num_workers(self.num_workers)
        .with_num_classes(self.num_classes)
        .with_seed(self.seed)
        .with_ckpt_path(self.ckpt_path.clone())
        .with_methods(self.methods.clone())
        .with_skip_knn_eval(self.skip_knn_eval)
        .with_skip_linear_eval(self.skip_linear_eval)
        .with_skip_finetune_eval(self.skip_finetune_eval)
        .with_skip_transfer_tasks(self.skip_transfer_tasks)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("repbench=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.to_config();

    match args.accelerator {
        Accelerator::Wgpu => match args.precision {
            Precision::F32 => wgpu::run_f32(&config, args.devices),
            Precision::F16 => wgpu::run_f16(&config, args.devices),
        },
        Accelerator::Ndarray => {
            if args.precision == Precision::F16 {
                tracing::warn!("ndarray backend runs f32; ignoring --precision f16");
            }
            ndarray::run(&config)
        }
    }
}

mod wgpu {
    use super::*;
    use burn::backend::Autodiff;
    use burn::backend::wgpu::{Wgpu, WgpuDevice};
    use burn::tensor::f16;

    fn device_list(devices: usize) -> Vec<WgpuDevice> {
        if devices <= 1 {
            vec![WgpuDevice::default()]
        } else {
            (0..devices).map(WgpuDevice::DiscreteGpu).collect()
        }
    }

    pub fn run_f32(
        config: &BenchmarkConfig,
        devices: usize,
    ) -> Result<()> {
        run_benchmark::<Autodiff<Wgpu<f32, i32>>>(config, device_list(devices))
    }

    pub fn run_f16(
        config: &BenchmarkConfig,
        devices: usize,
    ) -> Result<()> {
        run_benchmark::<Autodiff<Wgpu<f16, i32>>>(config, device_list(devices))
    }
}

mod ndarray {
    use super::*;
    use burn::backend::Autodiff;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub fn run(config: &BenchmarkConfig) -> Result<()> {
        run_benchmark::<Autodiff<NdArray<f32>>>(config, vec![NdArrayDevice::default()])
    }
}
