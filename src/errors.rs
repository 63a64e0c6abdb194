use thiserror::Error;

use crate::codec::DecodeError;

#[derive(Debug, Error)]
pub enum DroidPilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Action decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Transcription error: {0}")]
    Asr(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Task cancelled")]
    Cancelled,
}

pub type DroidPilotResult<T> = Result<T, DroidPilotError>;

/// Failure classes of one model backend call. The agent loop retries the
/// retryable variants with backoff; `Auth` aborts the task immediately.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response envelope: {0}")]
    Envelope(String),
}

impl ModelError {
    /// Envelope errors count as transport-class failures.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::Auth(_))
    }
}
