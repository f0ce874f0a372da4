use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can abort a training run.
///
/// Configuration and transferability errors are raised before any batch is
/// read; the caller has to fix its configuration, nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("batch generator is not transferable to workers: {0}")]
    Transferability(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("prefetch worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Data(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn dataset(msg: impl Into<String>) -> Self {
        Error::Dataset(msg.into())
    }
}
