//! The boundary with the account aggregator.
//!
//! This module contains:
//! - The [ProviderGateway] trait that the rest of the crate programs against
//! - [MockProvider], an in-memory aggregator for tests and local development
//! - [HttpProvider], a client for an aggregator's REST API
//! - [RetryingProvider], which adds per-call timeouts and bounded retries to any gateway

mod error;
mod gateway;
mod http;
mod mock;
mod retry;
mod types;

pub use error::ProviderError;
pub use gateway::ProviderGateway;
pub use http::HttpProvider;
pub use mock::MockProvider;
pub use retry::{RetryingProvider, retry_with_backoff};
pub use types::{ConsentHandle, ConsentRequest, RawTransaction, SessionHandle};
