//! Bounded retries with exponential backoff around provider calls.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use time::Date;

use crate::{
    bank_link::LinkStatus,
    config::RetryPolicy,
    provider::{
        ConsentHandle, ConsentRequest, ProviderError, ProviderGateway, RawTransaction,
        SessionHandle,
    },
    session::SessionStatus,
};

/// Run `call` until it succeeds, fails with a non-transient error, or `policy` runs out of
/// attempts.
///
/// Each attempt is bounded by `call_timeout`. A timed out attempt counts as a transient failure.
/// When the attempts are exhausted the last transient error is surfaced as
/// [ProviderError::Unavailable].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    call_timeout: Duration,
    operation: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(call_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() => return Err(error),
            Err(error) if attempt >= max_attempts => {
                tracing::warn!("{operation} failed after {attempt} attempts: {error}");
                return Err(ProviderError::Unavailable(format!(
                    "{operation} failed after {attempt} attempts: {error}"
                )));
            }
            Err(error) => {
                let delay = policy.backoff_for(attempt);
                tracing::debug!(
                    "{operation} attempt {attempt}/{max_attempts} failed: {error}, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Wraps a [ProviderGateway] so that every call is timed out and retried according to a
/// [RetryPolicy].
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl<P: ProviderGateway> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            call_timeout,
        }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ProviderGateway> ProviderGateway for RetryingProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn create_consent(
        &self,
        request: &ConsentRequest,
    ) -> Result<ConsentHandle, ProviderError> {
        retry_with_backoff(self.policy, self.call_timeout, "create consent", || {
            self.inner.create_consent(request)
        })
        .await
    }

    async fn get_consent_status(&self, consent_id: &str) -> Result<LinkStatus, ProviderError> {
        retry_with_backoff(self.policy, self.call_timeout, "get consent status", || {
            self.inner.get_consent_status(consent_id)
        })
        .await
    }

    async fn create_data_session(
        &self,
        consent_id: &str,
        from_date: Date,
        to_date: Date,
    ) -> Result<SessionHandle, ProviderError> {
        retry_with_backoff(self.policy, self.call_timeout, "create data session", || {
            self.inner
                .create_data_session(consent_id, from_date, to_date)
        })
        .await
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        retry_with_backoff(self.policy, self.call_timeout, "get session status", || {
            self.inner.get_session_status(session_id)
        })
        .await
    }

    async fn fetch_transactions(
        &self,
        session_id: &str,
    ) -> Result<Vec<RawTransaction>, ProviderError> {
        retry_with_backoff(self.policy, self.call_timeout, "fetch transactions", || {
            self.inner.fetch_transactions(session_id)
        })
        .await
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), ProviderError> {
        retry_with_backoff(self.policy, self.call_timeout, "revoke consent", || {
            self.inner.revoke_consent(consent_id)
        })
        .await
    }
}
