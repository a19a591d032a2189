#![allow(missing_docs)]

use thiserror::Error;

/// Failure talking to the marketplace service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials were rejected on an unauthenticated endpoint.
    #[error("{0}")]
    Authentication(String),
    /// The bearer credential was rejected. `purged` is set when this
    /// response was the one that cleared the persisted session.
    #[error("session expired, please sign in again")]
    Unauthorized { purged: bool },
    /// Any other non-success status.
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether the caller should drop back to the sign-in view.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
