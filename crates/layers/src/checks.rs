//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape assertions that can be wired into
//! constructors or forward paths. They return `candle_core::Result<()>` so
//! call sites can propagate errors without panicking.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {:?}, got {:?}",
            expected,
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, channels, depth, height, width)` convention with a
/// known channel count.
pub fn expect_bcdhw(context: &str, tensor: &Tensor, channels: usize) -> Result<()> {
    match tensor.dims() {
        [_, c, _, _, _] if *c == channels => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, {channels}, depth, height, width) layout, got {dims:?}"
        ))),
    }
}

/// Checks two volumes agree on every spatial dimension.
pub fn expect_same_spatial(context: &str, a: &Tensor, b: &Tensor) -> Result<()> {
    let (_, _, ad, ah, aw) = a.dims5()?;
    let (_, _, bd, bh, bw) = b.dims5()?;
    if (ad, ah, aw) == (bd, bh, bw) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: spatial dimensions {:?} and {:?} do not match",
            (ad, ah, aw),
            (bd, bh, bw)
        )))
    }
}

/// Checks every spatial dimension is even, the precondition for factor-2
/// non-overlapping pooling.
pub fn expect_even_spatial(context: &str, tensor: &Tensor) -> Result<()> {
    let (_, _, d, h, w) = tensor.dims5()?;
    if d % 2 == 0 && h % 2 == 0 && w % 2 == 0 {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: spatial dimensions {:?} must be even",
            (d, h, w)
        )))
    }
}
