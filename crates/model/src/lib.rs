//! Semi-Bayesian volumetric segmentation network: a deterministic
//! convolutional encoder joined to a variational (Flipout) decoder over
//! skip connections, ending in a class head whose terminal activation is
//! chosen by the class count.

pub mod block;
pub mod config;
pub mod error;
pub mod model;

pub use block::{DownStage, EndStage, UpStage};
pub use config::VNetConfig;
pub use error::{Error, Result};
pub use model::SemiBayesianVNet;
