#![warn(missing_docs)]
#![recursion_limit = "256"]
//!# repbench - Self-Supervised Representation Benchmarks
//!
//! A benchmarking harness for self-supervised visual representation
//! learning on ``burn``. For each registered method the harness
//! pretrains a ResNet backbone with the method's objective, then scores
//! the learned representation with k-NN, linear-probe, fine-tune, and
//! transfer protocols.
//!
//! ## Notable Components
//!
//! * [`models`] - the ResNet backbone family.
//! * [`layers`] - reusable blocks (conv/norm, projection heads).
//! * [`methods`] - the method registry and per-method modules.
//! * [`loss`] - self-supervised objectives.
//! * [`transforms`] - multi-view augmentation pipelines.
//! * [`data`] - image-folder datasets and batchers.
//! * [`optim`] - LARS and the warmup/cosine schedule.
//! * [`eval`] - k-NN, linear, fine-tune, and transfer protocols.
//! * [`bench`] - benchmark orchestration (pretrain + eval stages).

extern crate core;
/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod bench;
pub mod data;
pub mod eval;
pub mod layers;
pub mod loss;
pub mod methods;
pub mod models;
pub mod optim;
pub mod transforms;

#[cfg(test)]
pub(crate) mod testing {
    use crate::models::resnet::ResNetConfig;

    /// Test backend.
    pub type TestBackend = burn::backend::NdArray<f32>;

    /// Autodiff test backend.
    pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

    /// A tiny backbone plan for fast test forwards (feature dim 64).
    pub fn tiny_resnet_config() -> ResNetConfig {
        ResNetConfig::new([1, 1, 1, 1]).with_base_width(8)
    }
}
