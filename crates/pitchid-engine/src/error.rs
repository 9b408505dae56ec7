//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] pitchid_store::StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Hint file error: {0}")]
    HintFile(String),

    #[error("Engine service has stopped")]
    ServiceStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn hint_file(msg: impl Into<String>) -> Self {
        Self::HintFile(msg.into())
    }
}
