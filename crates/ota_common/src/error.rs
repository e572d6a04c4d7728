//! Error types for the bundle server.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Manifest is unreadable: {0}")]
    CorruptState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OtaError {
    /// Stable machine-readable code for logs and API bodies
    pub fn code(&self) -> &'static str {
        match self {
            OtaError::InvalidInput(_) => "invalid_input",
            OtaError::NotFound(_) => "not_found",
            OtaError::CorruptState(_) => "corrupt_state",
            OtaError::Forbidden(_) => "forbidden",
            OtaError::TooLarge(_) => "too_large",
            OtaError::Config(_) => "config",
            OtaError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for OtaError {
    fn from(err: serde_json::Error) -> Self {
        OtaError::CorruptState(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OtaError>;
