//! Error types for the provider gateway.

use std::time::Duration;

use thiserror::Error;

/// The ways a call to the aggregator can fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The aggregator could not be reached or answered with a server error.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// A single call took longer than the configured per-call timeout.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The aggregator rejected the request as invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The consent behind the request is not active at the aggregator.
    #[error("consent is not active")]
    ConsentNotActive,

    /// The data session has not finished preparing its data.
    #[error("session is not ready")]
    SessionNotReady,

    /// The consent was revoked before this request.
    #[error("consent already revoked")]
    AlreadyRevoked,

    /// The consent or session is unknown to the aggregator.
    #[error("not found: {0}")]
    NotFound(String),

    /// The aggregator answered with a body that does not have the expected structure.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_) | ProviderError::Timeout(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Unavailable(format!("request timed out: {error}"))
        } else if error.is_decode() {
            ProviderError::InvalidResponse(error.to_string())
        } else if error.is_connect() || error.is_request() || error.is_body() {
            ProviderError::Unavailable(error.to_string())
        } else {
            ProviderError::InvalidRequest(error.to_string())
        }
    }
}
