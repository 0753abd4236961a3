//! Factor-2 spatial resampling for volumetric feature maps.

use candle_core::{Result, Tensor};

use crate::checks;

/// Non-overlapping 2x2x2 max pooling. Every spatial dimension must be even.
pub fn max_pool3d(x: &Tensor) -> Result<Tensor> {
    checks::expect_even_spatial("max_pool3d", x)?;
    let (b, c, d, h, w) = x.dims5()?;
    // Reduce depth pairs first, then pool height/width with channels and
    // depth folded together (pooling is independent per channel).
    let depth_pooled = x.reshape(vec![b, c, d / 2, 2, h, w])?.max(3)?;
    let merged = depth_pooled.reshape((b, c * (d / 2), h, w))?;
    let pooled = merged.max_pool2d(2)?;
    pooled.reshape((b, c, d / 2, h / 2, w / 2))
}

/// Nearest-neighbour upsampling doubling every spatial dimension.
pub fn upsample_nearest3d(x: &Tensor) -> Result<Tensor> {
    let (b, c, d, h, w) = x.dims5()?;
    let plane = x
        .reshape((b, c * d, h, w))?
        .upsample_nearest2d(h * 2, w * 2)?;
    plane
        .reshape((b, c, d, h * 2, w * 2))?
        .unsqueeze(3)?
        .repeat(vec![1, 1, 1, 2, 1, 1])?
        .reshape((b, c, d * 2, h * 2, w * 2))
}
