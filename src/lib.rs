//! aa_bridge connects a personal finance backend to an Account Aggregator.
//!
//! The library negotiates data-sharing consent with the aggregator, tracks consent and fetch
//! session lifecycles driven by signed webhooks, and turns the fetched provider records into
//! deduplicated, categorized transactions stored in SQLite.

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
mod bank_link;
mod category;
mod config;
mod database_id;
mod db;
mod dedupe;
mod endpoints;
mod fetch;
mod ingest;
mod logging;
mod normalizer;
mod provider;
mod routing;
mod session;
mod transaction;
mod webhook;

#[cfg(test)]
mod test_utils;

pub use app_state::AppState;
pub use bank_link::{BankLink, LinkStatus, TransitionOutcome, transition_link};
pub use category::{CategoryOverride, RecategorizeMode};
pub use config::{AggregatorConfig, RetryPolicy};
pub use database_id::{BankLinkId, TransactionId, UserId};
pub use db::initialize as initialize_db;
pub use dedupe::compute_identity;
pub use fetch::{
    DEFAULT_QUEUE_CAPACITY, FetchJob, FetchQueue, LinkFetchOutcome, run_scheduled_fetch,
    spawn_fetch_worker,
};
pub use ingest::{IngestSummary, ingest_session};
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use provider::{
    ConsentHandle, ConsentRequest, HttpProvider, MockProvider, ProviderError, ProviderGateway,
    RawTransaction, RetryingProvider,
};
pub use routing::build_router;
pub use session::SessionStatus;
pub use transaction::{Direction, Transaction};
pub use webhook::{WebhookEvent, sign_event};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A webhook's signature did not match the one computed with the shared secret.
    ///
    /// The event must not be acted on.
    #[error("webhook signature does not match")]
    InvalidSignature,

    /// A bank link cannot move from its current status to the requested one.
    ///
    /// This usually means a webhook was delivered out of order or twice.
    #[error("bank link cannot move from {from} to {to}")]
    InvalidTransition { from: LinkStatus, to: LinkStatus },

    /// The consent behind a bank link is not active, so no data may be fetched.
    #[error("consent is not active")]
    ConsentNotActive,

    /// The data session has not finished preparing its data.
    #[error("data session is not ready")]
    SessionNotReady,

    /// The aggregator could not be reached after retrying.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The aggregator rejected a request as invalid.
    #[error("provider rejected the request: {0}")]
    InvalidProviderRequest(String),

    /// The aggregator answered with a body that could not be understood.
    #[error("provider sent an invalid response: {0}")]
    InvalidProviderResponse(String),

    /// A provider record could not be normalized.
    ///
    /// The record is skipped, the rest of its batch is unaffected.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A request to this service was structurally invalid.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A category matcher is empty or is not a valid regular expression.
    #[error("invalid matcher pattern: {0}")]
    InvalidPattern(String),

    /// A transaction refers to a bank link owned by a different user.
    #[error("the bank link belongs to a different user")]
    OwnerMismatch,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<ProviderError> for Error {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Unavailable(reason) => Error::ProviderUnavailable(reason),
            ProviderError::Timeout(duration) => {
                Error::ProviderUnavailable(format!("call timed out after {duration:?}"))
            }
            ProviderError::InvalidRequest(reason) => Error::InvalidProviderRequest(reason),
            ProviderError::ConsentNotActive | ProviderError::AlreadyRevoked => {
                Error::ConsentNotActive
            }
            ProviderError::SessionNotReady => Error::SessionNotReady,
            ProviderError::NotFound(_) => Error::NotFound,
            ProviderError::InvalidResponse(reason) => Error::InvalidProviderResponse(reason),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidSignature => StatusCode::UNAUTHORIZED,
            Error::MalformedRequest(_)
            | Error::InvalidPattern(_)
            | Error::InvalidProviderRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. }
            | Error::ConsentNotActive
            | Error::SessionNotReady
            | Error::OwnerMismatch => StatusCode::CONFLICT,
            Error::ProviderUnavailable(_) | Error::InvalidProviderResponse(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "an unexpected error occurred, check the server logs" })),
                )
                    .into_response();
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
