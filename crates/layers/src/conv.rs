//! Stride-1 volumetric convolutions.
//!
//! Inputs follow the `(batch, channels, depth, height, width)` convention
//! and kernels are `(out_channels, in_channels, kd, kh, kw)`. Candle exposes
//! 1D/2D convolution kernels only, so the 3D routine decomposes along the
//! depth axis: each depth tap folds its slab into the batch dimension, runs
//! `conv2d`, and the taps are summed. Padding is applied explicitly up
//! front; `Same` reproduces stride-1 SAME semantics, including the
//! asymmetric trailing pad for even kernel sizes.

use std::str::FromStr;

use candle_core::{Error, Result, Tensor};
use candle_nn::init::{DEFAULT_KAIMING_NORMAL, ZERO};
use candle_nn::VarBuilder;

use crate::activations::Activation;
use crate::checks;

/// Spatial padding mode shared by every convolution in a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Zero-pad so stride-1 outputs keep the input's spatial dimensions.
    Same,
    /// No padding; every kernel placement stays fully inside the input.
    Valid,
}

impl FromStr for Padding {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "same" => Ok(Padding::Same),
            "valid" => Ok(Padding::Valid),
            other => Err(Error::Msg(format!("unrecognised padding mode {other:?}"))),
        }
    }
}

fn same_pad(k: usize) -> (usize, usize) {
    let front = (k - 1) / 2;
    (front, k - 1 - front)
}

/// Applies a stride-1 3D convolution with the given kernel.
pub fn conv3d(x: &Tensor, kernel: &Tensor, padding: Padding) -> Result<Tensor> {
    let (b, c_in, _, _, _) = x.dims5()?;
    let (c_out, k_in, kd, kh, kw) = kernel.dims5()?;
    if k_in != c_in {
        return Err(Error::Msg(format!(
            "conv3d: kernel expects {k_in} input channels, got {c_in}"
        )));
    }
    if kd == 0 || kh == 0 || kw == 0 {
        return Err(Error::Msg("conv3d: kernel dimensions must be non-zero".into()));
    }
    let x = match padding {
        Padding::Same => {
            let (df, db) = same_pad(kd);
            let (hf, hb) = same_pad(kh);
            let (wf, wb) = same_pad(kw);
            x.pad_with_zeros(2, df, db)?
                .pad_with_zeros(3, hf, hb)?
                .pad_with_zeros(4, wf, wb)?
        }
        Padding::Valid => x.clone(),
    };
    let (_, _, dp, hp, wp) = x.dims5()?;
    if dp < kd || hp < kh || wp < kw {
        return Err(Error::Msg(format!(
            "conv3d: input {:?} is smaller than the {kd}x{kh}x{kw} kernel",
            x.dims()
        )));
    }
    let d_out = dp - kd + 1;
    let mut taps: Option<Tensor> = None;
    for tap in 0..kd {
        let slab = x
            .narrow(2, tap, d_out)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b * d_out, c_in, hp, wp))?;
        let tap_kernel = kernel.narrow(2, tap, 1)?.squeeze(2)?.contiguous()?;
        let out = slab.conv2d(&tap_kernel, 0, 1, 1, 1)?;
        taps = Some(match taps {
            Some(acc) => (acc + out)?,
            None => out,
        });
    }
    let out = taps.ok_or_else(|| Error::Msg("conv3d: empty kernel".into()))?;
    let (_, _, h_out, w_out) = out.dims4()?;
    out.reshape((b, d_out, c_out, h_out, w_out))?
        .transpose(1, 2)?
        .contiguous()
}

/// Configuration for a single volumetric convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv3dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: (usize, usize, usize),
    pub padding: Padding,
    /// Non-linearity fused into the forward pass.
    pub activation: Activation,
}

impl Conv3dConfig {
    /// Creates a cubic-kernel configuration with SAME padding and ReLU.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel: (kernel_size, kernel_size, kernel_size),
            padding: Padding::Same,
            activation: Activation::Relu,
        }
    }
}

/// Deterministic 3D convolution with a fused activation.
#[derive(Debug)]
pub struct Conv3d {
    config: Conv3dConfig,
    weight: Tensor,
    bias: Tensor,
}

impl Conv3d {
    pub fn new(config: Conv3dConfig, vb: VarBuilder) -> Result<Self> {
        if config.in_channels == 0 || config.out_channels == 0 {
            return Err(Error::Msg("conv3d: channel counts must be non-zero".into()));
        }
        let (kd, kh, kw) = config.kernel;
        let weight = vb.get_with_hints(
            (config.out_channels, config.in_channels, kd, kh, kw),
            "weight",
            DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(config.out_channels, "bias", ZERO)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &Conv3dConfig {
        &self.config
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        checks::expect_bcdhw("conv3d.input", x, self.config.in_channels)?;
        let out = conv3d(x, &self.weight, self.config.padding)?;
        let bias = self.bias.reshape((1, self.config.out_channels, 1, 1, 1))?;
        self.config.activation.apply(&out.broadcast_add(&bias)?)
    }
}
