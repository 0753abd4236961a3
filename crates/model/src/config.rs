use candle_core::{DType, Device};
use vnet_layers::activations::Activation;
use vnet_layers::conv::Padding;
use vnet_layers::variational::VariationalConfig;

use crate::error::{Error, Result};
use crate::model::ENCODER_FILTERS;

/// High-level configuration for assembling the segmentation network.
#[derive(Debug, Clone)]
pub struct VNetConfig {
    /// Output channel count; also selects the terminal activation (sigmoid
    /// for one class, channel softmax otherwise).
    pub n_classes: usize,
    /// Declared input volume as `(depth, height, width, channels)`.
    pub input_shape: (usize, usize, usize, usize),
    /// Kernel edge length shared by encoder and decoder convolutions.
    pub kernel_size: usize,
    /// Non-linearity applied to every non-terminal convolution.
    pub activation: Activation,
    /// Spatial padding mode for every convolution.
    pub padding: Padding,
    /// Group count for the normalisation layers.
    pub norm_groups: usize,
    pub dtype: DType,
    pub device: Device,
    /// Prior/posterior/divergence functions shared by every stochastic
    /// layer of this network instance.
    pub variational: VariationalConfig,
}

impl Default for VNetConfig {
    fn default() -> Self {
        Self {
            n_classes: 1,
            input_shape: (256, 256, 256, 1),
            kernel_size: 3,
            activation: Activation::Relu,
            padding: Padding::Same,
            norm_groups: 8,
            dtype: DType::F32,
            device: Device::Cpu,
            variational: VariationalConfig::default(),
        }
    }
}

impl VNetConfig {
    /// Validate structural invariants before any layer is built.
    pub fn validate(&self) -> Result<()> {
        if self.n_classes == 0 {
            return Err(Error::InvalidConfig("n_classes must be at least 1".into()));
        }
        let (depth, height, width, channels) = self.input_shape;
        if channels == 0 {
            return Err(Error::InvalidConfig(
                "input_shape needs at least one channel".into(),
            ));
        }
        for (axis, dim) in [("depth", depth), ("height", height), ("width", width)] {
            if dim == 0 || dim % 8 != 0 {
                return Err(Error::InvalidConfig(format!(
                    "input {axis} ({dim}) must be a positive multiple of 8; \
                     the encoder halves each spatial axis three times"
                )));
            }
        }
        if self.kernel_size == 0 {
            return Err(Error::InvalidConfig("kernel_size must be at least 1".into()));
        }
        if self.norm_groups == 0 || ENCODER_FILTERS[0] % self.norm_groups != 0 {
            return Err(Error::InvalidConfig(format!(
                "norm_groups ({}) must divide the narrowest stage width ({})",
                self.norm_groups, ENCODER_FILTERS[0]
            )));
        }
        Ok(())
    }
}
