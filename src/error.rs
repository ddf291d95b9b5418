//! Error taxonomy for the reconciliation engine.

use thiserror::Error;

/// Failure of a single adapter operation.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{venue} returned {status}: {body}")]
    Api {
        venue: String,
        status: u16,
        body: String,
    },

    #[error("missing credential: {0}")]
    Credentials(String),

    #[error("order signing failed: {0}")]
    Signing(String),

    #[error("malformed venue response: {0}")]
    Decode(String),
}

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad configuration or malformed arguments. Fatal to the call that
    /// raised it, never to the process.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network or venue failure. Logged, counted, scoped to the cycle.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Scaling collapsed to zero or free margin is exhausted.
    #[error("insufficient capital: {0}")]
    InsufficientCapital(String),
}
