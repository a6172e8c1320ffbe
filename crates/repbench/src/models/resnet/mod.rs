//! # `ResNet`
//!
//! The backbone family used by every benchmark method: a standard
//! `ResNet` with the classification head removed, exposing pooled
//! features through [`ResNet::forward_features`].

pub mod downsample;
pub mod residual;

use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dConfig};
use crate::models::resnet::residual::{
    BOTTLENECK_EXPANSION, ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use bimm_contracts::unpack_shape_contract;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// ResNet-18 stage depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];

/// ResNet-34 stage depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// ResNet-50 stage depths (bottleneck blocks).
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// [`StageBlock`] Config; a sequence of residual blocks.
#[derive(Config, Debug)]
pub struct StageBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl StageBlockConfig {
    /// Build a stage config.
    ///
    /// The first block carries the stride and the channel change;
    /// the rest are identity-shaped.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        out_planes: usize,
        stride: usize,
        bottleneck: bool,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    ResidualBlockConfig::build(in_planes, out_planes, stride, bottleneck)
                } else {
                    ResidualBlockConfig::build(out_planes, out_planes, 1, bottleneck)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Initialize a [`StageBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> StageBlock<B> {
        StageBlock {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// A sequence of [`ResidualBlock`]s at one resolution.
#[derive(Module, Debug)]
pub struct StageBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> StageBlock<B> {
    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    /// Apply the stage.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.blocks.iter().fold(input, |x, block| block.forward(x))
    }
}

/// [`ResNet`] Meta API.
pub trait ResNetMeta {
    /// Stem width (stage-1 input planes).
    fn base_width(&self) -> usize;

    /// Whether stages use bottleneck blocks.
    fn bottleneck(&self) -> bool;

    /// Size of the pooled feature vector.
    fn feature_dim(&self) -> usize {
        let expansion = if self.bottleneck() {
            BOTTLENECK_EXPANSION
        } else {
            1
        };
        self.base_width() * 8 * expansion
    }
}

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Per-stage block counts.
    pub blocks: [usize; 4],

    /// Use bottleneck blocks.
    #[config(default = false)]
    pub bottleneck: bool,

    /// Stem width.
    #[config(default = 64)]
    pub base_width: usize,
}

impl ResNetMeta for ResNetConfig {
    fn base_width(&self) -> usize {
        self.base_width
    }

    fn bottleneck(&self) -> bool {
        self.bottleneck
    }
}

impl ResNetConfig {
    /// ResNet-18 config.
    pub fn resnet18() -> Self {
        Self::new(RESNET18_BLOCKS)
    }

    /// ResNet-34 config.
    pub fn resnet34() -> Self {
        Self::new(RESNET34_BLOCKS)
    }

    /// ResNet-50 config.
    pub fn resnet50() -> Self {
        Self::new(RESNET50_BLOCKS).with_bottleneck(true)
    }

    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let w = self.base_width;
        let expansion = if self.bottleneck {
            BOTTLENECK_EXPANSION
        } else {
            1
        };

        // 7x7 conv, /2
        let stem: ConvNorm2dConfig = Conv2dConfig::new([3, w], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .into();

        // 3x3 maxpool, /2
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1));

        let bn = self.bottleneck;
        let layer1 = StageBlockConfig::build(self.blocks[0], w, w * expansion, 1, bn);
        let layer2 = StageBlockConfig::build(self.blocks[1], w * expansion, 2 * w * expansion, 2, bn);
        let layer3 =
            StageBlockConfig::build(self.blocks[2], 2 * w * expansion, 4 * w * expansion, 2, bn);
        let layer4 =
            StageBlockConfig::build(self.blocks[3], 4 * w * expansion, 8 * w * expansion, 2, bn);

        ResNet {
            stem: stem.init(device),
            maxpool: maxpool.init(),

            layer1: layer1.init(device),
            layer2: layer2.init(device),
            layer3: layer3.init(device),
            layer4: layer4.init(device),

            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),

            base_width: w,
            bottleneck: self.bottleneck,
        }
    }
}

/// Headless `ResNet` feature extractor.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvNorm2d<B>,
    maxpool: MaxPool2d,

    layer1: StageBlock<B>,
    layer2: StageBlock<B>,
    layer3: StageBlock<B>,
    layer4: StageBlock<B>,

    avgpool: AdaptiveAvgPool2d,

    base_width: usize,
    bottleneck: bool,
}

impl<B: Backend> ResNetMeta for ResNet<B> {
    fn base_width(&self) -> usize {
        self.base_width
    }

    fn bottleneck(&self) -> bool {
        self.bottleneck
    }
}

impl<B: Backend> ResNet<B> {
    /// Extract pooled features.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]``; the resolution must be
    ///   a multiple of the cumulative stride (32).
    ///
    /// # Returns
    ///
    /// A ``[batch, feature_dim]`` tensor.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [_batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", 3)],
        );

        // Stem
        let x = relu(self.stem.forward(input));
        let x = self.maxpool.forward(x);

        // Residual stages
        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        // Pool [B, C, H, W] -> [B, C]
        let x = self.avgpool.forward(x);
        x.flatten(1, 3)
    }
}
