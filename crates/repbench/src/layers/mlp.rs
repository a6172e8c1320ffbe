//! # MLP Projection / Prediction Heads
//!
//! Self-supervised methods map backbone features into an embedding
//! space through small MLP stacks; [`MlpHead`] covers the shapes every
//! method here needs (``Linear [+ BatchNorm] [+ activation]`` layers).

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{gelu, relu};

/// Post-linear activation selector.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum HeadActivationConfig {
    /// No activation.
    None,

    /// ReLU activation.
    Relu,

    /// GELU activation.
    Gelu,
}

/// [`MlpLayer`] Config.
#[derive(Config, Debug)]
pub struct MlpLayerConfig {
    /// Input feature size.
    pub in_features: usize,

    /// Output feature size.
    pub out_features: usize,

    /// Linear bias.
    #[config(default = true)]
    pub bias: bool,

    /// Append a `BatchNorm` after the linear layer.
    #[config(default = false)]
    pub batch_norm: bool,

    /// Activation applied after the (optionally normalized) output.
    #[config(default = "HeadActivationConfig::None")]
    pub activation: HeadActivationConfig,
}

impl MlpLayerConfig {
    /// Initialize an [`MlpLayer`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MlpLayer<B> {
        MlpLayer {
            linear: LinearConfig::new(self.in_features, self.out_features)
                .with_bias(self.bias)
                .init(device),
            norm: if self.batch_norm {
                Some(BatchNormConfig::new(self.out_features).init(device))
            } else {
                None
            },
            activation: Ignored(self.activation.clone()),
        }
    }
}

/// One ``Linear [+ BatchNorm] [+ activation]`` layer.
#[derive(Module, Debug)]
pub struct MlpLayer<B: Backend> {
    /// Internal linear layer.
    pub linear: Linear<B>,

    /// Optional norm layer.
    pub norm: Option<BatchNorm<B, 0>>,

    /// Activation selector.
    pub activation: Ignored<HeadActivationConfig>,
}

impl<B: Backend> MlpLayer<B> {
    /// Forward pass over ``[batch, in_features]``.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let x = self.linear.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        match self.activation.0 {
            HeadActivationConfig::None => x,
            HeadActivationConfig::Relu => relu(x),
            HeadActivationConfig::Gelu => gelu(x),
        }
    }
}

/// [`MlpHead`] Meta.
pub trait MlpHeadMeta {
    /// Input feature size.
    fn in_features(&self) -> usize;

    /// Output feature size.
    fn out_features(&self) -> usize;
}

/// [`MlpHead`] Config.
#[derive(Config, Debug)]
pub struct MlpHeadConfig {
    /// The component layers.
    pub layers: Vec<MlpLayerConfig>,
}

impl MlpHeadMeta for MlpHeadConfig {
    fn in_features(&self) -> usize {
        self.layers[0].in_features
    }

    fn out_features(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features
    }
}

impl MlpHeadConfig {
    /// A ``(Linear+BN+ReLU) * (n-1) + Linear`` stack.
    ///
    /// The standard contrastive projection-head shape; `dims` lists the
    /// feature sizes, e.g. ``&[2048, 2048, 128]`` for a 2-layer head.
    pub fn batch_norm_mlp(dims: &[usize]) -> Self {
        assert!(dims.len() >= 2, "head needs at least one layer");
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(idx, w)| {
                let last = idx == dims.len() - 2;
                MlpLayerConfig::new(w[0], w[1])
                    .with_batch_norm(!last)
                    .with_activation(if last {
                        HeadActivationConfig::None
                    } else {
                        HeadActivationConfig::Relu
                    })
            })
            .collect();
        Self { layers }
    }

    /// A ``(Linear+GELU) * (n-1) + Linear`` stack, norm-free.
    pub fn gelu_mlp(dims: &[usize]) -> Self {
        assert!(dims.len() >= 2, "head needs at least one layer");
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(idx, w)| {
                let last = idx == dims.len() - 2;
                MlpLayerConfig::new(w[0], w[1]).with_activation(if last {
                    HeadActivationConfig::None
                } else {
                    HeadActivationConfig::Gelu
                })
            })
            .collect();
        Self { layers }
    }

    /// Check inter-layer feature sizes line up.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("layers is empty".to_string());
        }
        for idx in 1..self.layers.len() {
            let prev = &self.layers[idx - 1];
            let curr = &self.layers[idx];
            if prev.out_features != curr.in_features {
                return Err(format!(
                    "layer[{}].out_features({}) != layer[{}].in_features({})",
                    idx - 1,
                    prev.out_features,
                    idx,
                    curr.in_features,
                ));
            }
        }
        Ok(())
    }

    /// Initialize an [`MlpHead`].
    ///
    /// # Panics
    ///
    /// If the layer sizes do not line up.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MlpHead<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
        MlpHead {
            layers: self.layers.iter().map(|l| l.init(device)).collect(),
        }
    }
}

/// MLP head module.
#[derive(Module, Debug)]
pub struct MlpHead<B: Backend> {
    /// Internal layers.
    pub layers: Vec<MlpLayer<B>>,
}

impl<B: Backend> MlpHeadMeta for MlpHead<B> {
    fn in_features(&self) -> usize {
        self.layers[0].linear.weight.shape().dims[0]
    }

    fn out_features(&self) -> usize {
        self.layers[self.layers.len() - 1].linear.weight.shape().dims[1]
    }
}

impl<B: Backend> MlpHead<B> {
    /// Apply the head.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_features]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_features]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [_batch] = unpack_shape_contract!(
            ["batch", "in_features"],
            &input,
            &["batch"],
            &[("in_features", self.in_features())],
        );

        self.layers.iter().fold(input, |x, layer| layer.forward(x))
    }
}
