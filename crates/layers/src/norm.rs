//! Group normalisation for volumetric feature maps.
//!
//! Inputs follow the `(batch, channels, depth, height, width)` convention.
//! Channels are partitioned into groups and normalised per group across the
//! grouped channels and all spatial positions, independent of batch size,
//! followed by a learnable per-channel affine.

use candle_core::{Error, Result, Tensor};
use candle_nn::init::{ONE, ZERO};
use candle_nn::VarBuilder;

use crate::checks;

/// Configuration shared by group-normalisation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNormConfig {
    pub channels: usize,
    /// Group count; must divide `channels`.
    pub groups: usize,
    /// Numeric stabiliser applied to the variance.
    pub epsilon: f64,
}

impl GroupNormConfig {
    pub fn new(channels: usize, groups: usize) -> Self {
        Self {
            channels,
            groups,
            epsilon: 1e-5,
        }
    }
}

/// Group normalisation with learnable per-channel scale and shift.
#[derive(Debug, Clone)]
pub struct GroupNorm {
    config: GroupNormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl GroupNorm {
    pub fn new(config: GroupNormConfig, vb: VarBuilder) -> Result<Self> {
        if config.groups == 0 {
            return Err(Error::Msg("group norm requires at least one group".into()));
        }
        if config.channels % config.groups != 0 {
            return Err(Error::Msg(format!(
                "group norm: {} channels cannot be split into {} groups",
                config.channels, config.groups
            )));
        }
        let weight = vb.get_with_hints(config.channels, "weight", ONE)?;
        let bias = vb.get_with_hints(config.channels, "bias", ZERO)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &GroupNormConfig {
        &self.config
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        checks::expect_bcdhw("group_norm.input", x, self.config.channels)?;
        let (b, c, d, h, w) = x.dims5()?;
        let groups = self.config.groups;
        let grouped = x.reshape((b, groups, (c / groups) * d * h * w))?;
        let mean = grouped.mean_keepdim(2)?;
        let centered = grouped.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(2)?;
        let normalised = centered.broadcast_div(&(variance + self.config.epsilon)?.sqrt()?)?;
        let weight = self.weight.reshape((1, c, 1, 1, 1))?;
        let bias = self.bias.reshape((1, c, 1, 1, 1))?;
        normalised
            .reshape((b, c, d, h, w))?
            .broadcast_mul(&weight)?
            .broadcast_add(&bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn groups_are_normalised_to_zero_mean_unit_variance() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = GroupNorm::new(GroupNormConfig::new(4, 2), vb.pp("norm"))?;
        let x = Tensor::randn(1.5f32, 2.0f32, (2, 4, 2, 2, 2), &device)?;
        let y = norm.forward(&x)?;
        assert_eq!(y.dims(), x.dims());

        // fresh affine parameters are scale 1 / shift 0, so the raw group
        // statistics are observable on the output
        let grouped = y.reshape((2, 2, 16))?;
        let means = grouped.mean(2)?.flatten_all()?.to_vec1::<f32>()?;
        let second_moments = grouped.sqr()?.mean(2)?.flatten_all()?.to_vec1::<f32>()?;
        for (mean, second) in means.iter().zip(&second_moments) {
            assert!(mean.abs() < 1e-5, "group mean {mean} not centred");
            let variance = second - mean * mean;
            assert!((variance - 1.0).abs() < 1e-3, "group variance {variance} not unit");
        }
        Ok(())
    }

    #[test]
    fn group_count_must_divide_channels() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(GroupNorm::new(GroupNormConfig::new(6, 4), vb.pp("a")).is_err());
        assert!(GroupNorm::new(GroupNormConfig::new(4, 0), vb.pp("b")).is_err());
    }
}
