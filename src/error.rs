use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Various errors that can occur when building denoisers or evaluating fidelity terms
#[derive(Debug, Error)]
pub enum Error {
    #[error("no value function defined for this data fidelity term")]
    NoValue,
    #[error("no gradient defined for this data fidelity term")]
    NoGradient,
    #[error("no prox operator is implemented for the data fidelity term")]
    NoProx,
    #[error("unsupported activation mode `{0}`")]
    UnsupportedActivation(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("checkpoint does not match the model: {0}")]
    Checkpoint(crate::checkpoint::StateDictDiff),
    #[error("no denoiser registered under `{0}`")]
    UnknownDenoiser(String),
    #[error("a denoiser is already registered under `{0}`")]
    AlreadyRegistered(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[cfg(feature = "opencl")]
    #[error(transparent)]
    Gpu(#[from] crate::ops::gpu::GpuError),
    #[cfg(feature = "download")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
