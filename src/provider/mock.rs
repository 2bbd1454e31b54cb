//! An in-memory aggregator for tests and local development.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    bank_link::LinkStatus,
    provider::{
        ConsentHandle, ConsentRequest, ProviderError, ProviderGateway, RawTransaction,
        SessionHandle,
    },
    session::SessionStatus,
};

#[derive(Debug, Clone)]
struct MockConsent {
    status: LinkStatus,
    valid_till: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
struct MockSession {
    status: SessionStatus,
    records: Vec<RawTransaction>,
}

#[derive(Debug, Default)]
struct MockState {
    consents: HashMap<String, MockConsent>,
    sessions: HashMap<String, MockSession>,
    /// Records handed to the next session opened under each consent.
    scripted_records: HashMap<String, Vec<RawTransaction>>,
}

/// An aggregator that keeps consents and sessions in memory.
///
/// The test controls drive it the way the real aggregator's back office would: activating
/// consents, preparing session data and injecting outages.
#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
    failures_remaining: AtomicU32,
    fetch_calls: AtomicU32,
    fetch_hook: Mutex<Option<FetchHook>>,
}

/// Runs while a session's transactions are being fetched, given the session ID.
struct FetchHook(Box<dyn Fn(&str) + Send + Sync>);

impl std::fmt::Debug for FetchHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FetchHook")
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, ProviderError> {
        self.state
            .lock()
            .map_err(|_| ProviderError::Unavailable("mock provider state is poisoned".to_owned()))
    }

    /// Make the next `count` calls fail with a transient error.
    pub fn fail_next_calls(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), ProviderError> {
        let took_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();

        if took_failure {
            Err(ProviderError::Unavailable("injected outage".to_owned()))
        } else {
            Ok(())
        }
    }

    /// Change the aggregator-side status of `consent_id`, as if the user acted on it.
    pub fn set_consent_status(&self, consent_id: &str, status: LinkStatus) {
        if let Ok(mut state) = self.state() {
            state
                .consents
                .entry(consent_id.to_owned())
                .or_insert(MockConsent {
                    status,
                    valid_till: None,
                })
                .status = status;
        }
    }

    /// Set the records returned by the next session opened under `consent_id`.
    pub fn script_records(&self, consent_id: &str, records: Vec<RawTransaction>) {
        if let Ok(mut state) = self.state() {
            state
                .scripted_records
                .insert(consent_id.to_owned(), records);
        }
    }

    /// Change the aggregator-side status of `session_id`, as if its data finished preparing.
    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) {
        if let Ok(mut state) = self.state() {
            if let Some(session) = state.sessions.get_mut(session_id) {
                session.status = status;
            }
        }
    }

    /// Run `hook` during every later call to [ProviderGateway::fetch_transactions], as if
    /// something happened while the data was in transit.
    pub fn on_fetch(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.fetch_hook.lock() {
            *slot = Some(FetchHook(Box::new(hook)));
        }
    }

    /// How many times [ProviderGateway::fetch_transactions] was called, failed calls included.
    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderGateway for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_consent(
        &self,
        request: &ConsentRequest,
    ) -> Result<ConsentHandle, ProviderError> {
        self.maybe_fail()?;

        if request.from_date > request.to_date {
            return Err(ProviderError::InvalidRequest(
                "consent date range ends before it starts".to_owned(),
            ));
        }

        let consent_id = format!("mock-consent-{}", Uuid::new_v4());
        self.state()?.consents.insert(
            consent_id.clone(),
            MockConsent {
                status: LinkStatus::Pending,
                valid_till: None,
            },
        );

        Ok(ConsentHandle {
            redirect_url: format!(
                "https://mock-aa.invalid/consents/{consent_id}?redirect={}",
                request.redirect_url
            ),
            consent_id,
            status: LinkStatus::Pending,
            valid_till: None,
        })
    }

    async fn get_consent_status(&self, consent_id: &str) -> Result<LinkStatus, ProviderError> {
        self.maybe_fail()?;

        self.state()?
            .consents
            .get(consent_id)
            .map(|consent| consent.status)
            .ok_or_else(|| ProviderError::NotFound(consent_id.to_owned()))
    }

    async fn create_data_session(
        &self,
        consent_id: &str,
        from_date: Date,
        to_date: Date,
    ) -> Result<SessionHandle, ProviderError> {
        self.maybe_fail()?;

        if from_date > to_date {
            return Err(ProviderError::InvalidRequest(
                "session date range ends before it starts".to_owned(),
            ));
        }

        let mut state = self.state()?;
        let consent = state
            .consents
            .get(consent_id)
            .ok_or_else(|| ProviderError::NotFound(consent_id.to_owned()))?;

        let is_lapsed = consent
            .valid_till
            .is_some_and(|valid_till| valid_till <= OffsetDateTime::now_utc());
        if consent.status != LinkStatus::Active || is_lapsed {
            return Err(ProviderError::ConsentNotActive);
        }

        let records = state
            .scripted_records
            .get(consent_id)
            .cloned()
            .unwrap_or_default();
        let session_id = format!("mock-session-{}", Uuid::new_v4());
        state.sessions.insert(
            session_id.clone(),
            MockSession {
                status: SessionStatus::Pending,
                records,
            },
        );

        Ok(SessionHandle {
            session_id,
            status: SessionStatus::Pending,
        })
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        self.maybe_fail()?;

        self.state()?
            .sessions
            .get(session_id)
            .map(|session| session.status)
            .ok_or_else(|| ProviderError::NotFound(session_id.to_owned()))
    }

    async fn fetch_transactions(
        &self,
        session_id: &str,
    ) -> Result<Vec<RawTransaction>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(hook) = self.fetch_hook.lock() {
            if let Some(FetchHook(hook)) = hook.as_ref() {
                hook(session_id);
            }
        }
        self.maybe_fail()?;

        let state = self.state()?;
        let session = state
            .sessions
            .get(session_id)
            .ok_or_else(|| ProviderError::NotFound(session_id.to_owned()))?;

        match session.status {
            SessionStatus::Ready => Ok(session.records.clone()),
            SessionStatus::Pending => Err(ProviderError::SessionNotReady),
            SessionStatus::Failed => Err(ProviderError::InvalidRequest(format!(
                "session {session_id} failed"
            ))),
        }
    }

    async fn revoke_consent(&self, consent_id: &str) -> Result<(), ProviderError> {
        self.maybe_fail()?;

        let mut state = self.state()?;
        let consent = state
            .consents
            .get_mut(consent_id)
            .ok_or_else(|| ProviderError::NotFound(consent_id.to_owned()))?;

        if consent.status == LinkStatus::Revoked {
            return Err(ProviderError::AlreadyRevoked);
        }

        consent.status = LinkStatus::Revoked;
        Ok(())
    }
}
