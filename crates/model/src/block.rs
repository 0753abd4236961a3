//! Encoder, decoder, and output stages of the segmentation network.
//!
//! The encoder stages are fully deterministic; every decoder and head
//! convolution is a Flipout layer drawing its kernel from the configured
//! posterior.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use vnet_layers::activations::Activation;
use vnet_layers::checks;
use vnet_layers::conv::{Conv3d, Conv3dConfig};
use vnet_layers::flipout::FlipoutConv3d;
use vnet_layers::norm::{GroupNorm, GroupNormConfig};
use vnet_layers::resample::{max_pool3d, upsample_nearest3d};

use crate::config::VNetConfig;
use crate::error::Result;

fn cubic(config: &VNetConfig, in_channels: usize, out_channels: usize) -> Conv3dConfig {
    let mut conv = Conv3dConfig::new(in_channels, out_channels, config.kernel_size);
    conv.padding = config.padding;
    conv.activation = config.activation;
    conv
}

/// Deterministic encoder stage: two convolutions with group normalisation,
/// followed by factor-2 max pooling.
#[derive(Debug)]
pub struct DownStage {
    conv1: Conv3d,
    norm1: GroupNorm,
    conv2: Conv3d,
    norm2: GroupNorm,
}

impl DownStage {
    pub fn new(
        config: &VNetConfig,
        in_channels: usize,
        filters: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let groups = config.norm_groups;
        Ok(Self {
            conv1: Conv3d::new(cubic(config, in_channels, filters), vb.pp("conv1"))?,
            norm1: GroupNorm::new(GroupNormConfig::new(filters, groups), vb.pp("norm1"))?,
            conv2: Conv3d::new(cubic(config, filters, filters), vb.pp("conv2"))?,
            norm2: GroupNorm::new(GroupNormConfig::new(filters, groups), vb.pp("norm2"))?,
        })
    }

    /// The normalised pre-pool feature map kept for the skip connection.
    pub fn features(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.norm1.forward(&self.conv1.forward(x)?)?;
        Ok(self.norm2.forward(&self.conv2.forward(&x)?)?)
    }

    /// Returns `(skip, pooled)`: the pre-pool feature map and its
    /// downsampled successor.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let skip = self.features(x)?;
        let pooled = max_pool3d(&skip)?;
        Ok((skip, pooled))
    }
}

/// Stochastic decoder stage: upsample, kernel-2 Flipout convolution, skip
/// concatenation, then two further Flipout convolutions, all group
/// normalised.
#[derive(Debug)]
pub struct UpStage {
    conv_up: FlipoutConv3d,
    norm_up: GroupNorm,
    norm_merge: GroupNorm,
    conv1: FlipoutConv3d,
    norm1: GroupNorm,
    conv2: FlipoutConv3d,
    norm2: GroupNorm,
}

impl UpStage {
    pub fn new(
        config: &VNetConfig,
        in_channels: usize,
        skip_channels: usize,
        filters: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let groups = config.norm_groups;
        let variational = &config.variational;

        let mut up_conv = Conv3dConfig::new(in_channels, filters, 2);
        up_conv.padding = config.padding;
        up_conv.activation = config.activation;

        let merged = skip_channels + filters;
        Ok(Self {
            conv_up: FlipoutConv3d::new(up_conv, variational, vb.pp("conv_up"))?,
            norm_up: GroupNorm::new(GroupNormConfig::new(filters, groups), vb.pp("norm_up"))?,
            norm_merge: GroupNorm::new(GroupNormConfig::new(merged, groups), vb.pp("norm_merge"))?,
            conv1: FlipoutConv3d::new(cubic(config, merged, filters), variational, vb.pp("conv1"))?,
            norm1: GroupNorm::new(GroupNormConfig::new(filters, groups), vb.pp("norm1"))?,
            conv2: FlipoutConv3d::new(cubic(config, filters, filters), variational, vb.pp("conv2"))?,
            norm2: GroupNorm::new(GroupNormConfig::new(filters, groups), vb.pp("norm2"))?,
        })
    }

    /// The skip map must match the upsampled input on every spatial
    /// dimension; concatenation happens along the channel axis.
    pub fn forward(&self, x: &Tensor, skip: &Tensor) -> Result<Tensor> {
        let up = upsample_nearest3d(x)?;
        let up = self.norm_up.forward(&self.conv_up.forward(&up)?)?;
        checks::expect_same_spatial("up_stage.merge", skip, &up)?;
        let merged = self.norm_merge.forward(&Tensor::cat(&[skip, &up], 1)?)?;
        let out = self.norm1.forward(&self.conv1.forward(&merged)?)?;
        Ok(self.norm2.forward(&self.conv2.forward(&out)?)?)
    }

    pub(crate) fn stochastic_layers(&self) -> [&FlipoutConv3d; 3] {
        [&self.conv_up, &self.conv1, &self.conv2]
    }
}

/// Output head: one Flipout convolution into class channels, then a 1x1x1
/// Flipout convolution carrying the terminal non-linearity. Binary
/// segmentation (one class) ends in a sigmoid, anything wider in a
/// channel-axis softmax.
#[derive(Debug)]
pub struct EndStage {
    conv: FlipoutConv3d,
    head: FlipoutConv3d,
}

impl EndStage {
    pub fn new(config: &VNetConfig, in_channels: usize, vb: VarBuilder) -> Result<Self> {
        let variational = &config.variational;

        // The class head keeps SAME padding regardless of the configured
        // mode: spatial size must survive to the output.
        let mut conv_cfg = Conv3dConfig::new(in_channels, config.n_classes, config.kernel_size);
        conv_cfg.activation = config.activation;

        let mut head_cfg = Conv3dConfig::new(config.n_classes, config.n_classes, 1);
        head_cfg.activation = if config.n_classes == 1 {
            Activation::Sigmoid
        } else {
            Activation::Softmax
        };

        Ok(Self {
            conv: FlipoutConv3d::new(conv_cfg, variational, vb.pp("conv"))?,
            head: FlipoutConv3d::new(head_cfg, variational, vb.pp("head"))?,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.head.forward(&self.conv.forward(x)?)?)
    }

    pub(crate) fn stochastic_layers(&self) -> [&FlipoutConv3d; 2] {
        [&self.conv, &self.head]
    }
}
