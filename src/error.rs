use std::time::Duration;

/// Errors raised by a durable store adapter.
///
/// The cache layer never surfaces these to callers of `resolve`: read failures
/// degrade to a miss and write failures are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a fetcher talking to an upstream source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Request error: {0}")]
    Request(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Source {0} is unavailable")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
