//! Activation catalogue for volumetric segmentation stacks.
//!
//! Activations consume tensors shaped `(batch, channels, depth, height,
//! width)` and return tensors with identical layout. `Softmax` normalises
//! the channel axis so per-voxel class scores sum to one.

use std::str::FromStr;

use candle_core::{Error, Result, Tensor};
use candle_nn::ops;

/// Closed set of non-linearities recognised by the network configuration.
///
/// Selection happens once at construction time; unrecognised names are
/// rejected there instead of surfacing during the forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Identity function, useful when wiring custom heads.
    Identity,
    Relu,
    /// SiLU (a.k.a. swish).
    Silu,
    /// Element-wise logistic function, the binary segmentation head.
    Sigmoid,
    /// Channel-axis softmax, the multi-class segmentation head.
    Softmax,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Identity => Ok(x.clone()),
            Activation::Relu => x.relu(),
            Activation::Silu => x.silu(),
            Activation::Sigmoid => ops::sigmoid(x),
            Activation::Softmax => ops::softmax(x, 1),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "identity" | "linear" => Ok(Activation::Identity),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "softmax" => Ok(Activation::Softmax),
            other => Err(Error::Msg(format!("unrecognised activation {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn names_resolve_case_insensitively() -> Result<()> {
        assert_eq!("relu".parse::<Activation>()?, Activation::Relu);
        assert_eq!("ReLU".parse::<Activation>()?, Activation::Relu);
        assert_eq!("linear".parse::<Activation>()?, Activation::Identity);
        assert_eq!("swish".parse::<Activation>()?, Activation::Silu);
        assert_eq!("SOFTMAX".parse::<Activation>()?, Activation::Softmax);
        Ok(())
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!("mish".parse::<Activation>().is_err());
        assert!("".parse::<Activation>().is_err());
    }

    #[test]
    fn softmax_normalises_the_channel_axis() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1f32, (2, 3, 1, 2, 2), &device)?;
        let y = Activation::Softmax.apply(&x)?;
        let sums = y.sum(1)?.flatten_all()?.to_vec1::<f32>()?;
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5, "channel sum {sum} != 1");
        }
        Ok(())
    }

    #[test]
    fn sigmoid_stays_in_the_open_unit_interval() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 4f32, (1, 2, 2, 2, 2), &device)?;
        let y = Activation::Sigmoid.apply(&x)?;
        for value in y.flatten_all()?.to_vec1::<f32>()? {
            assert!(value > 0.0 && value < 1.0);
        }
        Ok(())
    }
}
