//! Building blocks for volumetric segmentation networks.
//!
//! Feature maps follow the `(batch, channels, depth, height, width)`
//! convention throughout. Candle ships 1D/2D kernels only, so the 3D
//! convolution, pooling, and upsampling routines here are composed from
//! those primitives. The `variational` and `flipout` modules carry the
//! distribution-valued convolution machinery used by Bayesian decoders.

pub mod activations;
pub mod checks;
pub mod conv;
pub mod flipout;
pub mod norm;
pub mod resample;
pub mod variational;

pub use activations::Activation;
pub use conv::{conv3d, Conv3d, Conv3dConfig, Padding};
pub use flipout::FlipoutConv3d;
pub use norm::{GroupNorm, GroupNormConfig};
pub use resample::{max_pool3d, upsample_nearest3d};
pub use variational::{
    gaussian_kl_divergence, mean_field_normal_posterior, standard_normal_prior, DivergenceFn,
    KernelDistribution, PosteriorFn, PriorFn, VariationalConfig,
};
