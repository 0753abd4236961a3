//! Stochastic convolutions with Flipout weight perturbation.
//!
//! The kernel is a random variable: forwards convolve with the posterior
//! mean, then add a perturbation convolution whose noise is decorrelated
//! across the batch through per-example input/output sign flips. Every call
//! draws fresh noise. The divergence between posterior and prior is exposed
//! through [`FlipoutConv3d::kl_loss`] for the caller to aggregate into the
//! training objective.

use std::fmt;

use candle_core::{Error, Result, Tensor};
use candle_nn::init::ZERO;
use candle_nn::VarBuilder;

use crate::checks;
use crate::conv::{conv3d, Conv3dConfig};
use crate::variational::{DivergenceFn, KernelDistribution, VariationalConfig};

/// 3D convolution whose kernel follows a learned posterior distribution.
///
/// The bias stays a deterministic variable; only the kernel carries
/// uncertainty.
pub struct FlipoutConv3d {
    config: Conv3dConfig,
    posterior: KernelDistribution,
    prior: KernelDistribution,
    divergence: Option<DivergenceFn>,
    bias: Tensor,
}

impl FlipoutConv3d {
    pub fn new(
        config: Conv3dConfig,
        variational: &VariationalConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.in_channels == 0 || config.out_channels == 0 {
            return Err(Error::Msg(
                "flipout conv: channel counts must be non-zero".into(),
            ));
        }
        let (kd, kh, kw) = config.kernel;
        let shape = [config.out_channels, config.in_channels, kd, kh, kw];
        let posterior = (variational.posterior)(&shape, vb.pp("kernel_posterior"))?;
        let prior = (variational.prior)(&shape, vb.dtype(), vb.device())?;
        checks::expect_shape("flipout.posterior.loc", &posterior.loc, &shape)?;
        checks::expect_shape("flipout.posterior.scale", &posterior.scale, &shape)?;
        checks::expect_shape("flipout.prior.loc", &prior.loc, &shape)?;
        checks::expect_shape("flipout.prior.scale", &prior.scale, &shape)?;
        let bias = vb.get_with_hints(config.out_channels, "bias", ZERO)?;
        Ok(Self {
            config,
            posterior,
            prior,
            divergence: variational.divergence.clone(),
            bias,
        })
    }

    pub fn config(&self) -> &Conv3dConfig {
        &self.config
    }

    /// Divergence between the kernel posterior and prior; `None` when no
    /// divergence function is configured.
    pub fn kl_loss(&self) -> Result<Option<Tensor>> {
        match &self.divergence {
            Some(divergence) => Ok(Some(divergence(&self.posterior, &self.prior)?)),
            None => Ok(None),
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        checks::expect_bcdhw("flipout.input", x, self.config.in_channels)?;
        let (b, _, _, _, _) = x.dims5()?;
        let mean = conv3d(x, &self.posterior.loc, self.config.padding)?;

        // Perturbation path: delta = scale * eps, decorrelated per example
        // by Rademacher sign flips on input and output channels.
        let eps = self.posterior.scale.randn_like(0.0, 1.0)?;
        let delta = (&self.posterior.scale * &eps)?;
        let input_signs = rademacher((b, self.config.in_channels, 1, 1, 1), x)?;
        let output_signs = rademacher((b, self.config.out_channels, 1, 1, 1), x)?;
        let perturbation = conv3d(&x.broadcast_mul(&input_signs)?, &delta, self.config.padding)?
            .broadcast_mul(&output_signs)?;

        let bias = self.bias.reshape((1, self.config.out_channels, 1, 1, 1))?;
        let out = (mean + perturbation)?.broadcast_add(&bias)?;
        self.config.activation.apply(&out)
    }
}

fn rademacher(shape: (usize, usize, usize, usize, usize), like: &Tensor) -> Result<Tensor> {
    let uniform = Tensor::rand(0f32, 1f32, shape, like.device())?;
    uniform.ge(0.5)?.to_dtype(like.dtype())?.affine(2.0, -1.0)
}

impl fmt::Debug for FlipoutConv3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlipoutConv3d")
            .field("config", &self.config)
            .field("divergence", &self.divergence.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::Activation;
    use crate::variational::gaussian_kl_divergence;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn flipout_conv(with_divergence: bool) -> Result<(FlipoutConv3d, VarMap)> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut variational = VariationalConfig::default();
        if with_divergence {
            variational.divergence = Some(gaussian_kl_divergence());
        }
        let conv = FlipoutConv3d::new(Conv3dConfig::new(2, 3, 3), &variational, vb.pp("conv"))?;
        Ok((conv, varmap))
    }

    #[test]
    fn forward_preserves_spatial_dimensions() -> Result<()> {
        let (conv, _varmap) = flipout_conv(false)?;
        let x = Tensor::randn(0f32, 1f32, (2, 2, 4, 4, 4), &Device::Cpu)?;
        let y = conv.forward(&x)?;
        assert_eq!(y.dims(), &[2, 3, 4, 4, 4]);
        Ok(())
    }

    #[test]
    fn forwards_draw_fresh_weight_noise() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut config = Conv3dConfig::new(2, 3, 3);
        config.activation = Activation::Identity;
        let conv = FlipoutConv3d::new(config, &VariationalConfig::default(), vb.pp("conv"))?;

        let x = Tensor::randn(0f32, 1f32, (1, 2, 4, 4, 4), &device)?;
        let a = conv.forward(&x)?;
        let b = conv.forward(&x)?;
        let diff = a.sub(&b)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff > 0.0, "two stochastic passes produced identical outputs");
        Ok(())
    }

    #[test]
    fn kl_loss_follows_the_configuration() -> Result<()> {
        let (conv, _varmap) = flipout_conv(false)?;
        assert!(conv.kl_loss()?.is_none());

        let (conv, _varmap) = flipout_conv(true)?;
        let kl = conv
            .kl_loss()?
            .expect("divergence configured")
            .to_vec0::<f32>()?;
        assert!(kl > 0.0, "kl {kl} should be positive for a narrow posterior");
        Ok(())
    }
}
