//! The capability interface every aggregator implementation provides.

use std::sync::Arc;

use async_trait::async_trait;
use time::Date;

use crate::{
    bank_link::LinkStatus,
    provider::{ConsentHandle, ConsentRequest, ProviderError, RawTransaction, SessionHandle},
    session::SessionStatus,
};

/// Trait for talking to an account aggregator.
///
/// The consent state machine and the ingestion pipeline only see this trait, so a real
/// aggregator, the in-memory mock, or a future provider can be swapped without touching them.
///
/// Status queries are for reconciliation only. Webhooks are the primary trigger for lifecycle
/// transitions.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// A short name for logs, e.g. "mock".
    fn name(&self) -> &'static str;

    /// Ask the aggregator to create a consent for `request`.
    async fn create_consent(&self, request: &ConsentRequest)
    -> Result<ConsentHandle, ProviderError>;

    /// Get the aggregator's current status for `consent_id`.
    async fn get_consent_status(&self, consent_id: &str) -> Result<LinkStatus, ProviderError>;

    /// Open a data session covering `from_date` to `to_date` under `consent_id`.
    ///
    /// Fails with [ProviderError::ConsentNotActive] if the consent is not active.
    async fn create_data_session(
        &self,
        consent_id: &str,
        from_date: Date,
        to_date: Date,
    ) -> Result<SessionHandle, ProviderError>;

    /// Get the aggregator's current status for `session_id`.
    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError>;

    /// Pull the raw transactions prepared for `session_id`, in provider order.
    ///
    /// Fails with [ProviderError::SessionNotReady] if the data is not prepared yet.
    async fn fetch_transactions(
        &self,
        session_id: &str,
    ) -> Result<Vec<RawTransaction>, ProviderError>;

    /// Revoke `consent_id`.
    ///
    /// Fails with [ProviderError::AlreadyRevoked] if the consent was already revoked, callers
    /// should treat that as success.
    async fn revoke_consent(&self, consent_id: &str) -> Result<(), ProviderError>;
}

/// Lets a shared gateway be wrapped, e.g. by [RetryingProvider](crate::provider::RetryingProvider),
/// while the caller keeps a handle to it.
#[async_trait]
impl<P: ProviderGateway + ?Sized> ProviderGateway for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn create_consent(
        &self,
        request: &ConsentRequest,
    ) -> Result<ConsentHandle, ProviderError> {
        (**self).create_consent(request).await
    }

    async fn get_consent_status(&self, consent_id: &str) -> Result<LinkStatus, ProviderError> {
        (**self).get_consent_status(consent_id).await
    }

    async fn create_data_session(
        &self,
        consent_id: &str,
        from_date: Date,
        to_date: Date,
    ) -> Result<SessionHandle, ProviderError> {
        (**self)
            .create_data_session(consent_id, from_date, to_date)
            .await
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        (**self).get_session_status(session_id).await
    }

    async fn fetch_transactions(
        &self,
        session_id: &str,
    ) -> Result<Vec<RawTransaction>, ProviderError> {
        (**self).fetch_transactions(session_id).await
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), ProviderError> {
        (**self).revoke_consent(consent_id).await
    }
}
