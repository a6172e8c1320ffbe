//! # The `ResNet` Downsample Implementation.
//!
//! A 1x1 strided conv/norm applied to the residual identity branch
//! whenever a block changes resolution or channel count.

use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Downsample`] configuration.
#[derive(Config, Debug)]
pub struct DownsampleConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub out_planes: usize,

    /// The stride of the downsample conv.
    #[config(default = 1)]
    pub stride: usize,
}

impl DownsampleConfig {
    /// Initialize a [`Downsample`] `Module`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Downsample<B> {
        let conv_norm: ConvNorm2dConfig =
            Conv2dConfig::new([self.in_planes, self.out_planes], [1, 1])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_bias(false)
                .into();

        Downsample {
            conv_norm: conv_norm.init(device),
        }
    }
}

/// `ResNet` identity-branch downsample layer.
///
/// Maps ``[batch, in_planes, in_height, in_width]`` to
/// ``[batch, out_planes, in_height/stride, in_width/stride]`` tensors.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    /// Embedded conv/norm.
    pub conv_norm: ConvNorm2d<B>,
}

impl<B: Backend> Downsample<B> {
    /// The stride of the downsample conv.
    pub fn stride(&self) -> usize {
        self.conv_norm.stride()[0]
    }

    /// Forward pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.conv_norm.forward(input)
    }
}
