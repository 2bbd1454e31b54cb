use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rusqlite::Connection;
use time::macros::date;
use tokio::sync::mpsc::Receiver;

use crate::{
    AppState,
    app_state::PipelineState,
    bank_link::{BankLink, LinkStatus, initiate_consent, reconcile_link},
    config::{AggregatorConfig, RetryPolicy},
    db::{initialize, lock_connection},
    fetch::{FetchJob, FetchQueue, start_fetch},
    provider::{ConsentRequest, MockProvider, ProviderGateway, RawTransaction, RetryingProvider},
    session::{SessionStatus, mark_session_ready},
};

pub(crate) const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

pub(crate) fn test_config() -> AggregatorConfig {
    AggregatorConfig {
        webhook_secret: TEST_WEBHOOK_SECRET.to_owned(),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        },
        call_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

/// A pipeline over an in-memory database and a mock aggregator wrapped in the retry layer.
pub(crate) fn test_pipeline() -> (PipelineState, Arc<MockProvider>) {
    let connection = Connection::open_in_memory().unwrap();
    initialize(&connection).unwrap();

    let config = test_config();
    let mock = Arc::new(MockProvider::new());
    let provider: Arc<dyn ProviderGateway> = Arc::new(RetryingProvider::new(
        mock.clone(),
        config.retry,
        config.call_timeout,
    ));

    let state = PipelineState {
        db_connection: Arc::new(Mutex::new(connection)),
        provider,
        config: Arc::new(config),
    };

    (state, mock)
}

/// Like [test_pipeline] but with the full server state and the fetch queue's receiver, which
/// must be kept alive for jobs to be accepted.
pub(crate) fn test_app_state() -> (AppState, Arc<MockProvider>, Receiver<FetchJob>) {
    let connection = Connection::open_in_memory().unwrap();

    let config = test_config();
    let mock = Arc::new(MockProvider::new());
    let provider: Arc<dyn ProviderGateway> = Arc::new(RetryingProvider::new(
        mock.clone(),
        config.retry,
        config.call_timeout,
    ));
    let (queue, receiver) = FetchQueue::new(16);

    let state = AppState::new(connection, provider, config, queue).unwrap();

    (state, mock, receiver)
}

pub(crate) fn consent_request(user_id: i64) -> ConsentRequest {
    ConsentRequest {
        user_id,
        fi_type: "DEPOSIT".to_owned(),
        purpose: "PERSONAL_FINANCE".to_owned(),
        from_date: date!(2024 - 01 - 01),
        to_date: date!(2025 - 12 - 31),
        frequency: "DAILY".to_owned(),
        redirect_url: "https://app.invalid/consent/done".to_owned(),
        webhook_url: "https://app.invalid/webhooks/aa".to_owned(),
    }
}

/// Initiate a consent for user 7 and activate it, returning the link and the consent ID.
pub(crate) async fn active_link(
    state: &PipelineState,
    mock: &MockProvider,
) -> (BankLink, String) {
    let (link, handle) = initiate_consent(&consent_request(7), state).await.unwrap();
    mock.set_consent_status(&handle.consent_id, LinkStatus::Active);
    reconcile_link(link.id, state).await.unwrap();

    let link = {
        let connection = lock_connection(&state.db_connection).unwrap();
        crate::bank_link::get_bank_link(link.id, &connection).unwrap()
    };

    (link, handle.consent_id)
}

/// Open a session for `link` serving `records` and mark it ready on both sides.
pub(crate) async fn ready_session(
    state: &PipelineState,
    mock: &MockProvider,
    link: &BankLink,
    consent_id: &str,
    records: Vec<RawTransaction>,
) -> String {
    mock.script_records(consent_id, records);
    let session = start_fetch(link.id, None, None, state).await.unwrap();
    mock.set_session_status(&session.aa_session_id, SessionStatus::Ready);

    let connection = lock_connection(&state.db_connection).unwrap();
    assert!(mark_session_ready(&session.aa_session_id, &connection).unwrap());

    session.aa_session_id
}

pub(crate) fn raw_record(
    txn_id: &str,
    timestamp: Option<&str>,
    txn_type: &str,
    amount: &str,
    merchant: &str,
) -> RawTransaction {
    RawTransaction {
        txn_id: Some(txn_id.to_owned()),
        transaction_timestamp: timestamp.map(str::to_owned),
        amount: Some(amount.to_owned()),
        currency: Some("INR".to_owned()),
        txn_type: Some(txn_type.to_owned()),
        narration: Some(format!("UPI/{}/{txn_id}", merchant.to_uppercase())),
        merchant: Some(merchant.to_owned()),
        masked_account: Some("XXXXXX1234".to_owned()),
        ..Default::default()
    }
}
