//! # `ResNet` Residual Blocks
//!
//! [`BasicBlock`] is the two-conv unit used by ResNet-18/34;
//! [`BottleneckBlock`] the 1x1/3x3/1x1 unit used by ResNet-50 and up.
//! [`ResidualBlock`] wraps either behind one forward.

use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::resnet::downsample::{Downsample, DownsampleConfig};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// Bottleneck channel expansion factor.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// Residual block Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of convolution.
    fn stride(&self) -> usize;
}

fn conv3x3(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
) -> ConvNorm2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .into()
}

fn conv1x1(
    in_planes: usize,
    out_planes: usize,
) -> ConvNorm2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [1, 1])
        .with_padding(PaddingConfig2d::Explicit(0, 0))
        .with_bias(false)
        .into()
}

fn downsample_config(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
) -> Option<DownsampleConfig> {
    if stride != 1 || in_planes != out_planes {
        Some(DownsampleConfig::new(in_planes, out_planes).with_stride(stride))
    } else {
        None
    }
}

/// [`BasicBlock`] Config.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub planes: usize,

    /// The stride of the first conv.
    #[config(default = 1)]
    pub stride: usize,
}

impl ResidualBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        BasicBlock {
            cn1: conv3x3(self.in_planes, self.planes, self.stride).init(device),
            cn2: conv3x3(self.planes, self.planes, 1).init(device),
            downsample: downsample_config(self.in_planes, self.planes, self.stride)
                .map(|cfg| cfg.init(device)),
        }
    }
}

/// Basic two-conv residual block.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First conv/norm (carries the stride).
    pub cn1: ConvNorm2d<B>,

    /// Second conv/norm.
    pub cn2: ConvNorm2d<B>,

    /// Optional downsample for the identity branch.
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> ResidualBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.cn1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.cn2.out_channels()
    }

    fn stride(&self) -> usize {
        self.cn1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, in_height/stride, in_width/stride]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.cn1.forward(input));
        let x = self.cn2.forward(x);

        relu(x + identity)
    }
}

/// [`BottleneckBlock`] Config.
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// Internal width; output is ``planes * BOTTLENECK_EXPANSION``.
    pub planes: usize,

    /// The stride of the middle conv.
    #[config(default = 1)]
    pub stride: usize,
}

impl ResidualBlockMeta for BottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.planes * BOTTLENECK_EXPANSION
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BottleneckBlockConfig {
    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        let out_planes = self.out_planes();
        BottleneckBlock {
            cn1: conv1x1(self.in_planes, self.planes).init(device),
            cn2: conv3x3(self.planes, self.planes, self.stride).init(device),
            cn3: conv1x1(self.planes, out_planes).init(device),
            downsample: downsample_config(self.in_planes, out_planes, self.stride)
                .map(|cfg| cfg.init(device)),
        }
    }
}

/// Bottleneck 1x1/3x3/1x1 residual block.
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Channel-reducing 1x1 conv/norm.
    pub cn1: ConvNorm2d<B>,

    /// 3x3 conv/norm (carries the stride).
    pub cn2: ConvNorm2d<B>,

    /// Channel-expanding 1x1 conv/norm.
    pub cn3: ConvNorm2d<B>,

    /// Optional downsample for the identity branch.
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> ResidualBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.cn1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.cn3.out_channels()
    }

    fn stride(&self) -> usize {
        self.cn2.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.cn1.forward(input));
        let x = relu(self.cn2.forward(x));
        let x = self.cn3.forward(x);

        relu(x + identity)
    }
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// A [`BasicBlock`].
    Basic(BasicBlockConfig),

    /// A [`BottleneckBlock`].
    Bottleneck(BottleneckBlockConfig),
}

impl From<BasicBlockConfig> for ResidualBlockConfig {
    fn from(config: BasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<BottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: BottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }
}

impl ResidualBlockConfig {
    /// Build a block config from its stage-level shape.
    ///
    /// `out_planes` is the post-expansion channel count.
    pub fn build(
        in_planes: usize,
        out_planes: usize,
        stride: usize,
        bottleneck: bool,
    ) -> Self {
        if bottleneck {
            BottleneckBlockConfig::new(in_planes, out_planes / BOTTLENECK_EXPANSION)
                .with_stride(stride)
                .into()
        } else {
            BasicBlockConfig::new(in_planes, out_planes)
                .with_stride(stride)
                .into()
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Basic(config) => ResidualBlock::Basic(config.init(device)),
            Self::Bottleneck(config) => ResidualBlock::Bottleneck(config.init(device)),
        }
    }
}

/// A [`BasicBlock`] or [`BottleneckBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// A [`BasicBlock`].
    Basic(BasicBlock<B>),

    /// A [`BottleneckBlock`].
    Bottleneck(BottleneckBlock<B>),
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Apply the wrapped block to the input.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;

    #[test]
    fn test_basic_block_config() {
        let config = BasicBlockConfig::new(16, 32).with_stride(2);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
    }

    #[test]
    fn test_bottleneck_block_config() {
        let config = BottleneckBlockConfig::new(16, 8).with_stride(2);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
    }

    #[test]
    fn test_residual_block_build() {
        let cfg = ResidualBlockConfig::build(16, 32, 2, false);
        assert!(matches!(cfg, ResidualBlockConfig::Basic(_)));
        assert_eq!(cfg.out_planes(), 32);

        let cfg = ResidualBlockConfig::build(16, 32, 2, true);
        assert!(matches!(cfg, ResidualBlockConfig::Bottleneck(_)));
        assert_eq!(cfg.out_planes(), 32);
    }

    #[test]
    fn test_basic_block_forward() {
        let device = Default::default();

        let block: ResidualBlock<TestBackend> =
            ResidualBlockConfig::build(4, 8, 2, false).init(&device);
        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.out_planes(), 8);
        assert_eq!(block.stride(), 2);

        let input = Tensor::ones([2, 4, 8, 8], &device);
        let output = block.forward(input);
        assert_eq!(output.shape().dims, [2, 8, 4, 4]);
    }

    #[test]
    fn test_bottleneck_block_forward_identity_shape() {
        let device = Default::default();

        let block: ResidualBlock<TestBackend> =
            ResidualBlockConfig::build(8, 8, 1, true).init(&device);

        let input = Tensor::ones([2, 8, 4, 4], &device);
        let output = block.forward(input);
        assert_eq!(output.shape().dims, [2, 8, 4, 4]);
    }
}
