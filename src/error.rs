//! Error types shared by the storage, remote and preference layers.

use thiserror::Error;

/// Failure while reading or writing layer settings.
///
/// Every variant is a non-fatal I/O condition from the point of view of the
/// settings controller: the in-memory value stays authoritative and the error
/// is only recorded for observability.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The local SQLite key-value store failed.
    #[error("local storage error: {0}")]
    Local(#[from] sqlx::Error),

    /// The HTTP request to the remote API failed (connect, timeout, decode).
    #[error("remote request failed: {0}")]
    Remote(#[from] reqwest::Error),

    /// The remote API answered with a non-success status code.
    #[error("remote endpoint returned HTTP {0}")]
    Status(u16),

    /// Settings could not be encoded for storage.
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),

    /// A backend reported itself unavailable.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
