//! Pluggable weight-distribution machinery for stochastic convolutions.
//!
//! Every stochastic layer is parameterised by three functions: a prior
//! constructor, a posterior constructor producing trainable location/scale
//! parameters, and an optional divergence reducing the pair to a scalar
//! regularisation term. Defaults are built fresh for every configuration so
//! no state is shared between network instances.

use std::fmt;
use std::sync::Arc;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::init::Init;
use candle_nn::VarBuilder;

/// Diagonal Gaussian over a convolution kernel.
#[derive(Debug, Clone)]
pub struct KernelDistribution {
    /// Per-weight mean, shaped like the kernel.
    pub loc: Tensor,
    /// Per-weight standard deviation, strictly positive.
    pub scale: Tensor,
}

/// Builds the fixed prior for a kernel of the given shape.
pub type PriorFn =
    Arc<dyn Fn(&[usize], DType, &Device) -> Result<KernelDistribution> + Send + Sync>;

/// Builds the trainable posterior for a kernel of the given shape.
pub type PosteriorFn =
    Arc<dyn Fn(&[usize], VarBuilder) -> Result<KernelDistribution> + Send + Sync>;

/// Reduces a posterior/prior pair to a scalar regularisation term.
pub type DivergenceFn =
    Arc<dyn Fn(&KernelDistribution, &KernelDistribution) -> Result<Tensor> + Send + Sync>;

/// Shared configuration threaded through every stochastic layer of one
/// network instance.
#[derive(Clone)]
pub struct VariationalConfig {
    pub prior: PriorFn,
    pub posterior: PosteriorFn,
    /// When unset, stochastic layers contribute no regularisation term.
    pub divergence: Option<DivergenceFn>,
}

impl Default for VariationalConfig {
    fn default() -> Self {
        Self {
            prior: standard_normal_prior(),
            posterior: mean_field_normal_posterior(),
            divergence: None,
        }
    }
}

impl fmt::Debug for VariationalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariationalConfig")
            .field("divergence", &self.divergence.is_some())
            .finish()
    }
}

pub(crate) fn softplus(x: &Tensor) -> Result<Tensor> {
    (x.exp()? + 1.0)?.log()
}

/// Standard-normal prior over every kernel weight.
pub fn standard_normal_prior() -> PriorFn {
    fn build(shape: &[usize], dtype: DType, device: &Device) -> Result<KernelDistribution> {
        Ok(KernelDistribution {
            loc: Tensor::zeros(shape, dtype, device)?,
            scale: Tensor::ones(shape, dtype, device)?,
        })
    }
    Arc::new(build)
}

/// Mean-field normal posterior: trainable location plus a softplus-mapped
/// scale so the standard deviation stays positive.
pub fn mean_field_normal_posterior() -> PosteriorFn {
    fn build(shape: &[usize], vb: VarBuilder) -> Result<KernelDistribution> {
        let loc = vb.get_with_hints(
            shape,
            "loc",
            Init::Randn {
                mean: 0.0,
                stdev: 0.1,
            },
        )?;
        let rho = vb.get_with_hints(
            shape,
            "rho",
            Init::Randn {
                mean: -3.0,
                stdev: 0.1,
            },
        )?;
        let scale = softplus(&rho)?;
        Ok(KernelDistribution { loc, scale })
    }
    Arc::new(build)
}

/// Closed-form KL divergence between two diagonal Gaussians, summed over all
/// kernel weights.
pub fn gaussian_kl_divergence() -> DivergenceFn {
    fn build(q: &KernelDistribution, p: &KernelDistribution) -> Result<Tensor> {
        let var_q = q.scale.sqr()?;
        let var_p = p.scale.sqr()?;
        let log_ratio = (p.scale.log()? - q.scale.log()?)?;
        let shift = (&q.loc - &p.loc)?.sqr()?;
        let quad = ((&var_q + &shift)? / (&var_p * 2.0)?)?;
        ((log_ratio + quad)? - 0.5)?.sum_all()
    }
    Arc::new(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn kl_between_identical_gaussians_is_zero() -> Result<()> {
        let device = Device::Cpu;
        let prior = standard_normal_prior()(&[2, 1, 1, 1, 1], DType::F32, &device)?;
        let kl = gaussian_kl_divergence()(&prior, &prior)?.to_vec0::<f32>()?;
        assert!(kl.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn kl_grows_with_the_location_shift() -> Result<()> {
        let device = Device::Cpu;
        let shape = [2usize, 1, 1, 1, 1];
        let prior = standard_normal_prior()(&shape, DType::F32, &device)?;
        let shifted = KernelDistribution {
            loc: Tensor::ones(&shape[..], DType::F32, &device)?,
            scale: Tensor::ones(&shape[..], DType::F32, &device)?,
        };
        let kl = gaussian_kl_divergence()(&shifted, &prior)?.to_vec0::<f32>()?;
        // a unit shift under a standard-normal prior costs 0.5 nats per weight
        assert!((kl - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn posterior_registers_trainable_parameters() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let posterior = mean_field_normal_posterior()(&[3, 2, 1, 1, 1], vb.pp("kernel"))?;
        assert_eq!(posterior.loc.dims(), &[3, 2, 1, 1, 1]);
        for scale in posterior.scale.flatten_all()?.to_vec1::<f32>()? {
            assert!(scale > 0.0, "scale {scale} must stay positive");
        }
        let mut names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["kernel.loc".to_string(), "kernel.rho".to_string()]);
        Ok(())
    }

    #[test]
    fn default_configuration_leaves_divergence_unset() {
        let config = VariationalConfig::default();
        assert!(config.divergence.is_none());
    }
}
