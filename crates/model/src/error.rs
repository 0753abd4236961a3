use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced while assembling or running the network.
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected before any layer is built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Volume fed to the graph disagrees with the declared input shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Propagated from the tensor engine.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
