use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy.
///
/// Configuration errors are raised before any training starts. Data errors
/// mean the dataset or an input batch breaks the transition contract and are
/// fatal for the run. Numerical errors abort the current fitting attempt.
/// Environment errors are surfaced from the collaborator unchanged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(String),

    #[error("data contract: {0}")]
    Data(String),

    #[error("numerical: {0}")]
    Numerical(String),

    #[error("environment: {0}")]
    Env(String),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error("artifact i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Error::Numerical(msg.into())
    }

    pub fn env(msg: impl Into<String>) -> Self {
        Error::Env(msg.into())
    }
}
