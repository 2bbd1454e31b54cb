//! The ingestion pipeline: fetch, normalize, hash, categorize and persist one data session.

use rusqlite::{Connection, Transaction as SqlTransaction, TransactionBehavior};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    Error,
    app_state::PipelineState,
    bank_link::{BankLink, LinkStatus, ensure_link_active, get_bank_link},
    category::{CategoryRules, get_category_overrides},
    db::lock_connection,
    dedupe::compute_identity,
    normalizer::normalize_batch,
    provider::ProviderError,
    session::{SessionStatus, discard_ready_session, get_data_session, mark_session_failed},
    transaction::{InsertOutcome, NewTransaction, insert_transaction},
};

/// The counts reported by one run of the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Transactions stored for the first time.
    pub inserted: usize,
    /// Transactions that were already stored, e.g. from an overlapping fetch.
    pub duplicates: usize,
    /// Provider records dropped as malformed.
    pub skipped: usize,
}

/// Pull the transactions of the ready session `aa_session_id` and store them.
///
/// The whole batch is written in one database transaction together with discarding the
/// session, so either every new transaction is stored and the session is consumed, or nothing
/// changes. The link is checked again inside that transaction, so a batch whose consent was
/// revoked or lapsed during the fetch is never stored. Transactions that are already stored are counted as duplicates, not errors.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the session is not tracked, e.g. it was already ingested,
/// - [Error::SessionNotReady] if the session is not `READY` or was consumed concurrently,
/// - [Error::ConsentNotActive] if the bank link was revoked or expired, the session is marked
///   `FAILED`,
/// - [Error::ProviderUnavailable] if the aggregator could not be reached after retrying, the
///   session is marked `FAILED`,
/// - or [Error::SqlError] if the batch could not be stored, nothing is written.
pub async fn ingest_session(
    aa_session_id: &str,
    state: &PipelineState,
) -> Result<IngestSummary, Error> {
    let link = {
        let connection = lock_connection(&state.db_connection)?;
        let session = get_data_session(aa_session_id, &connection)?;

        if session.status != SessionStatus::Ready {
            return Err(Error::SessionNotReady);
        }

        let link = get_bank_link(session.bank_link_id, &connection)?;
        if let Err(error) = ensure_link_active(&link, OffsetDateTime::now_utc(), &connection) {
            mark_session_failed(aa_session_id, &connection)?;
            return Err(error);
        }

        link
    };

    let records = match state.provider.fetch_transactions(aa_session_id).await {
        Ok(records) => records,
        // The aggregator disagrees that the data is ready, leave the session for a later poll.
        Err(ProviderError::SessionNotReady) => return Err(Error::SessionNotReady),
        Err(error) => {
            tracing::error!(
                "could not fetch data session {aa_session_id} for bank link {}: {error}",
                link.id
            );
            let connection = lock_connection(&state.db_connection)?;
            mark_session_failed(aa_session_id, &connection)?;
            return Err(error.into());
        }
    };

    let batch = normalize_batch(&records, &link, &state.config.default_currency);

    let connection = lock_connection(&state.db_connection)?;
    let summary = store_batch(aa_session_id, &link, batch.transactions, batch.skipped, &connection)?;

    tracing::info!(
        "ingested data session {aa_session_id} for bank link {}: {} inserted, {} duplicates, {} skipped",
        link.id,
        summary.inserted,
        summary.duplicates,
        summary.skipped
    );

    Ok(summary)
}

fn store_batch(
    aa_session_id: &str,
    link: &BankLink,
    mut transactions: Vec<NewTransaction>,
    skipped: usize,
    connection: &Connection,
) -> Result<IngestSummary, Error> {
    let rules = CategoryRules::compile(&get_category_overrides(link.user_id, connection)?);

    let transaction = SqlTransaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    // Claim the session first so that two workers cannot both store the batch.
    if !discard_ready_session(aa_session_id, &transaction)? {
        tracing::debug!("data session {aa_session_id} was consumed concurrently");
        return Err(Error::SessionNotReady);
    }

    // The link may have been revoked or lapsed while the data was being fetched.
    let current_link = get_bank_link(link.id, &transaction)?;
    let now = OffsetDateTime::now_utc();
    if current_link.status != LinkStatus::Active || current_link.is_past_validity(now) {
        transaction.rollback()?;
        tracing::info!(
            "bank link {} is no longer active, discarding the batch of data session {aa_session_id}",
            link.id
        );
        match ensure_link_active(&current_link, now, connection) {
            Ok(()) | Err(Error::ConsentNotActive) => {}
            Err(error) => return Err(error),
        }
        mark_session_failed(aa_session_id, connection)?;
        return Err(Error::ConsentNotActive);
    }

    let mut summary = IngestSummary {
        inserted: 0,
        duplicates: 0,
        skipped,
    };

    for new_transaction in &mut transactions {
        rules.categorize(new_transaction);
        let hash = compute_identity(new_transaction);

        match insert_transaction(new_transaction, &hash, &transaction)? {
            InsertOutcome::Inserted(_) => summary.inserted += 1,
            InsertOutcome::Duplicate => {
                tracing::debug!("transaction {hash} is already stored, skipping");
                summary.duplicates += 1;
            }
        }
    }

    transaction.commit()?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use crate::{
        Error,
        bank_link::{LinkStatus, get_bank_link, transition_link},
        category::{CategoryOverrideForm, create_category_override},
        db::lock_connection,
        provider::RawTransaction,
        session::{SessionStatus, get_data_session},
        test_utils::{active_link, ready_session, raw_record, test_pipeline},
        transaction::{count_transactions, get_transactions_for_user},
    };

    use super::{IngestSummary, ingest_session};

    fn records() -> Vec<RawTransaction> {
        vec![
            raw_record("T1", Some("2025-01-10T09:00:00Z"), "DEBIT", "120.00", "Starbucks"),
            raw_record("T2", None, "DEBIT", "45.00", "Uber"),
            raw_record("T3", Some("2025-01-11T18:30:00Z"), "CREDIT", "5000.00", "Salary"),
        ]
    }

    #[tokio::test]
    async fn stores_valid_records_and_counts_skips() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;

        let summary = ingest_session(&session_id, &state).await.unwrap();

        assert_eq!(
            summary,
            IngestSummary {
                inserted: 2,
                duplicates: 0,
                skipped: 1
            }
        );
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(count_transactions(&connection).unwrap(), 2);
        assert_eq!(
            get_data_session(&session_id, &connection),
            Err(Error::NotFound)
        );
    }

    #[tokio::test]
    async fn overlapping_fetch_stores_each_event_once() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let first = ready_session(&state, &mock, &link, &consent_id, records()).await;
        ingest_session(&first, &state).await.unwrap();

        let second = ready_session(&state, &mock, &link, &consent_id, records()).await;
        let summary = ingest_session(&second, &state).await.unwrap();

        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.duplicates, 2);
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(count_transactions(&connection).unwrap(), 2);
    }

    #[tokio::test]
    async fn session_is_consumed_after_one_ingest() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;
        ingest_session(&session_id, &state).await.unwrap();

        let result = ingest_session(&session_id, &state).await;

        assert_eq!(result, Err(Error::NotFound));
        assert_eq!(mock.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn categorizes_with_user_rules() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        {
            let connection = lock_connection(&state.db_connection).unwrap();
            create_category_override(
                link.user_id,
                &CategoryOverrideForm {
                    matcher: "starbucks".to_owned(),
                    category: "Food".to_owned(),
                    subcategory: Some("Coffee".to_owned()),
                },
                &connection,
            )
            .unwrap();
        }
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;

        ingest_session(&session_id, &state).await.unwrap();

        let connection = lock_connection(&state.db_connection).unwrap();
        let transactions = get_transactions_for_user(link.user_id, &connection).unwrap();
        let coffee = transactions
            .iter()
            .find(|transaction| transaction.merchant_name.as_deref() == Some("Starbucks"))
            .unwrap();
        assert_eq!(coffee.category.as_deref(), Some("Food"));
        assert_eq!(coffee.subcategory.as_deref(), Some("Coffee"));
        let salary = transactions
            .iter()
            .find(|transaction| transaction.merchant_name.as_deref() == Some("Salary"))
            .unwrap();
        assert_eq!(salary.category, None);
    }

    #[tokio::test]
    async fn pending_session_is_not_ready() {
        let (state, mock) = test_pipeline();
        let (link, _) = active_link(&state, &mock).await;
        let session = crate::fetch::start_fetch(link.id, None, None, &state)
            .await
            .unwrap();

        let result = ingest_session(&session.aa_session_id, &state).await;

        assert_eq!(result, Err(Error::SessionNotReady));
        assert_eq!(mock.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn provider_outage_fails_the_session() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;
        mock.fail_next_calls(10);

        let result = ingest_session(&session_id, &state).await;

        assert!(matches!(result, Err(Error::ProviderUnavailable(_))), "got {result:?}");
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(
            get_data_session(&session_id, &connection).unwrap().status,
            SessionStatus::Failed
        );
        assert_eq!(count_transactions(&connection).unwrap(), 0);
    }

    #[tokio::test]
    async fn revoked_link_fails_the_session() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;
        crate::bank_link::revoke_link(link.user_id, link.id, &state)
            .await
            .unwrap();

        let result = ingest_session(&session_id, &state).await;

        assert_eq!(result, Err(Error::ConsentNotActive));
        assert_eq!(mock.fetch_calls(), 0);
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(
            get_data_session(&session_id, &connection).unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn link_revoked_during_fetch_discards_the_batch() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;
        let db_connection = state.db_connection.clone();
        let link_id = link.id;
        mock.on_fetch(move |_| {
            let connection = lock_connection(&db_connection).unwrap();
            transition_link(link_id, LinkStatus::Revoked, None, &connection).unwrap();
        });

        let result = ingest_session(&session_id, &state).await;

        assert_eq!(result, Err(Error::ConsentNotActive));
        assert_eq!(mock.fetch_calls(), 1);
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(count_transactions(&connection).unwrap(), 0);
        assert_eq!(
            get_data_session(&session_id, &connection).unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn link_lapsed_during_fetch_is_expired() {
        let (state, mock) = test_pipeline();
        let (link, consent_id) = active_link(&state, &mock).await;
        let session_id = ready_session(&state, &mock, &link, &consent_id, records()).await;
        let db_connection = state.db_connection.clone();
        let link_id = link.id;
        mock.on_fetch(move |_| {
            let connection = lock_connection(&db_connection).unwrap();
            connection
                .execute(
                    "UPDATE bank_link SET valid_till = ?1 WHERE id = ?2",
                    (OffsetDateTime::now_utc() - Duration::minutes(1), link_id),
                )
                .unwrap();
        });

        let result = ingest_session(&session_id, &state).await;

        assert_eq!(result, Err(Error::ConsentNotActive));
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(count_transactions(&connection).unwrap(), 0);
        assert_eq!(
            get_bank_link(link.id, &connection).unwrap().status,
            LinkStatus::Expired
        );
        assert_eq!(
            get_data_session(&session_id, &connection).unwrap().status,
            SessionStatus::Failed
        );
    }
}
