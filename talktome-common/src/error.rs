// ================================================================
// File: talktome-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Lookup of something that has to exist (a prompt, a config file).
    /// Empty channels and ledgers are not errors; they yield empty results.
    #[error("Not found error: {0}")]
    NotFound(String),

    /// Rejected input. Raised before any mutation happens.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Moderation or model provider could not be reached, or answered with a
    /// non-success status.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider answered, but the body was not what we expected.
    #[error("Provider response error: {0}")]
    ProviderResponse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the calling layer may reasonably try the same operation again.
    /// Nothing in the core acts on this by itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ProviderUnavailable(_) | Error::Timeout(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::ProviderResponse(err.to_string())
        } else {
            Error::ProviderUnavailable(err.to_string())
        }
    }
}
