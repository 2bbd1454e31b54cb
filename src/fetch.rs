//! Opens data sessions and hands ready sessions to the ingestion worker.
//!
//! Sessions become ready asynchronously, usually announced by a `DATA_READY` webhook. The
//! webhook handler only enqueues a [FetchJob], a single worker task pulls the data and runs the
//! ingestion pipeline so webhook responses never wait on the aggregator.

use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};
use tokio::{
    sync::mpsc::{self, Receiver, Sender, error::TrySendError},
    task::JoinHandle,
};

use crate::{
    Error,
    app_state::PipelineState,
    bank_link::{LinkStatus, ensure_link_active, get_bank_link, get_bank_links_by_status},
    database_id::BankLinkId,
    db::lock_connection,
    ingest::ingest_session,
    session::{
        DataSession, SessionStatus, create_data_session, get_data_session,
        get_data_sessions_for_link, mark_session_failed, mark_session_ready,
    },
};

/// The default number of jobs that can wait for the fetch worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A request to ingest the data of a ready session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub aa_session_id: String,
}

/// The sending half of the fetch worker's job channel.
#[derive(Debug, Clone)]
pub struct FetchQueue {
    sender: Sender<FetchJob>,
}

impl FetchQueue {
    /// Create a queue holding at most `capacity` pending jobs, returning the receiver for
    /// [spawn_fetch_worker].
    pub fn new(capacity: usize) -> (Self, Receiver<FetchJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        (Self { sender }, receiver)
    }

    /// Queue the ready session `aa_session_id` for ingestion without waiting.
    ///
    /// Returns `false` if the queue is full or the worker has stopped. The session stays
    /// `READY` in that case and is picked up again by the next scheduled fetch.
    pub fn enqueue(&self, aa_session_id: &str) -> bool {
        let job = FetchJob {
            aa_session_id: aa_session_id.to_owned(),
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                tracing::debug!("queued data session {aa_session_id} for ingestion");
                true
            }
            Err(TrySendError::Full(job)) => {
                tracing::warn!(
                    "fetch queue is full, data session {} will be retried by the scheduler",
                    job.aa_session_id
                );
                false
            }
            Err(TrySendError::Closed(job)) => {
                tracing::error!(
                    "fetch worker has stopped, could not queue data session {}",
                    job.aa_session_id
                );
                false
            }
        }
    }
}

/// Spawn the task that ingests queued sessions one at a time until every [FetchQueue] is dropped.
pub fn spawn_fetch_worker(state: PipelineState, mut receiver: Receiver<FetchJob>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            match ingest_session(&job.aa_session_id, &state).await {
                Ok(summary) => tracing::debug!(
                    "fetch job for data session {} finished: {summary:?}",
                    job.aa_session_id
                ),
                // Another path consumed the session first.
                Err(Error::NotFound | Error::SessionNotReady) => tracing::debug!(
                    "data session {} is no longer ready, skipping",
                    job.aa_session_id
                ),
                Err(error) => tracing::error!(
                    "could not ingest data session {}: {error}",
                    job.aa_session_id
                ),
            }
        }

        tracing::info!("fetch queue closed, stopping fetch worker");
    })
}

/// Open a data session for `link_id` covering `from_date` to `to_date`.
///
/// Missing dates default to the configured look-back window ending today. A session the
/// aggregator reports as ready straight away is stored as `READY`, callers should enqueue it.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the link does not exist,
/// - [Error::ConsentNotActive] if the link is not active or its consent has lapsed,
/// - [Error::MalformedRequest] if the date range is inverted,
/// - [Error::ProviderUnavailable] if the aggregator could not be reached,
/// - or [Error::SqlError] if there is an SQL error.
pub async fn start_fetch(
    link_id: BankLinkId,
    from_date: Option<Date>,
    to_date: Option<Date>,
    state: &PipelineState,
) -> Result<DataSession, Error> {
    let now = OffsetDateTime::now_utc();
    let to_date = to_date.unwrap_or(now.date());
    let from_date = from_date
        .unwrap_or_else(|| to_date - Duration::days(state.config.fetch_window_days));

    if from_date > to_date {
        return Err(Error::MalformedRequest(format!(
            "fetch range ends ({to_date}) before it starts ({from_date})"
        )));
    }

    let link = {
        let connection = lock_connection(&state.db_connection)?;
        let link = get_bank_link(link_id, &connection)?;
        ensure_link_active(&link, now, &connection)?;
        link
    };

    let handle = state
        .provider
        .create_data_session(&link.aa_consent_id, from_date, to_date)
        .await?;

    let connection = lock_connection(&state.db_connection)?;
    create_data_session(link.id, &handle.session_id, from_date, to_date, &connection)?;
    tracing::info!(
        "opened data session {} for bank link {} covering {from_date} to {to_date}",
        handle.session_id,
        link.id
    );

    match handle.status {
        SessionStatus::Pending => {}
        SessionStatus::Ready => {
            mark_session_ready(&handle.session_id, &connection)?;
        }
        SessionStatus::Failed => {
            mark_session_failed(&handle.session_id, &connection)?;
        }
    }

    get_data_session(&handle.session_id, &connection)
}

/// Ask the aggregator for the status of a `PENDING` session and apply it.
///
/// This is the fallback for sessions whose `DATA_READY` webhook was lost. A session that
/// becomes ready is queued for ingestion. If the aggregator cannot report on the session, the
/// session is marked `FAILED` so that it no longer blocks new sessions for its link.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the session is not tracked here or at the aggregator,
/// - [Error::ProviderUnavailable] if the aggregator could not be reached,
/// - or [Error::SqlError] if there is an SQL error.
pub async fn poll_session(
    aa_session_id: &str,
    state: &PipelineState,
    queue: &FetchQueue,
) -> Result<SessionStatus, Error> {
    let session = {
        let connection = lock_connection(&state.db_connection)?;
        get_data_session(aa_session_id, &connection)?
    };

    if session.status != SessionStatus::Pending {
        return Ok(session.status);
    }

    let reported = match state.provider.get_session_status(aa_session_id).await {
        Ok(reported) => reported,
        Err(error) => {
            tracing::warn!(
                "could not poll data session {aa_session_id}, marking it failed: {error}"
            );
            let connection = lock_connection(&state.db_connection)?;
            mark_session_failed(aa_session_id, &connection)?;
            return Err(error.into());
        }
    };

    let connection = lock_connection(&state.db_connection)?;
    match reported {
        SessionStatus::Pending => {}
        SessionStatus::Ready => {
            if mark_session_ready(aa_session_id, &connection)? {
                queue.enqueue(aa_session_id);
            }
        }
        SessionStatus::Failed => {
            mark_session_failed(aa_session_id, &connection)?;
        }
    }

    Ok(reported)
}

/// What a scheduled fetch did for one bank link.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkFetchOutcome {
    /// A new session was opened.
    Opened {
        bank_link_id: BankLinkId,
        aa_session_id: String,
    },
    /// A session for the link is still in flight, so no new one was opened.
    InFlight { bank_link_id: BankLinkId },
    /// Opening a session failed. The other links are unaffected.
    Failed {
        bank_link_id: BankLinkId,
        error: String,
    },
}

/// Run one scheduled fetch over every `ACTIVE` bank link.
///
/// This is the single entry point for an external scheduler. For each link, pending sessions
/// are polled and ready sessions re-queued before a new session is opened, so a lost webhook
/// or a full queue delays ingestion by at most one run. Pending sessions the aggregator cannot
/// report on, or that are older than the configured maximum age, are marked `FAILED` and no
/// longer hold the link back. One link failing does not stop the rest.
///
/// # Errors
/// This function will return an error only if the active links could not be read.
pub async fn run_scheduled_fetch(
    state: &PipelineState,
    queue: &FetchQueue,
) -> Result<Vec<LinkFetchOutcome>, Error> {
    let links = {
        let connection = lock_connection(&state.db_connection)?;
        get_bank_links_by_status(LinkStatus::Active, &connection)?
    };

    let mut outcomes = Vec::with_capacity(links.len());
    for link in links {
        let outcome = match fetch_for_link(link.id, state, queue).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!("scheduled fetch for bank link {} failed: {error}", link.id);
                LinkFetchOutcome::Failed {
                    bank_link_id: link.id,
                    error: error.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }

    tracing::info!(
        "scheduled fetch finished for {} active bank links",
        outcomes.len()
    );

    Ok(outcomes)
}

async fn fetch_for_link(
    link_id: BankLinkId,
    state: &PipelineState,
    queue: &FetchQueue,
) -> Result<LinkFetchOutcome, Error> {
    let (pending, ready) = {
        let connection = lock_connection(&state.db_connection)?;
        (
            get_data_sessions_for_link(link_id, SessionStatus::Pending, &connection)?,
            get_data_sessions_for_link(link_id, SessionStatus::Ready, &connection)?,
        )
    };

    for session in &ready {
        queue.enqueue(&session.aa_session_id);
    }

    let now = OffsetDateTime::now_utc();
    let mut in_flight = !ready.is_empty();
    for session in &pending {
        if now - session.created_at >= state.config.session_max_age {
            tracing::warn!(
                "data session {} for bank link {link_id} has been pending since {}, marking it failed",
                session.aa_session_id,
                session.created_at
            );
            let connection = lock_connection(&state.db_connection)?;
            mark_session_failed(&session.aa_session_id, &connection)?;
            continue;
        }

        match poll_session(&session.aa_session_id, state, queue).await {
            Ok(SessionStatus::Failed) => {}
            Ok(_) => in_flight = true,
            Err(error @ (Error::SqlError(_) | Error::DatabaseLockError)) => return Err(error),
            // The session has been marked failed, the next one may fare better.
            Err(error) => tracing::warn!(
                "giving up on data session {} for bank link {link_id}: {error}",
                session.aa_session_id
            ),
        }
    }

    if in_flight {
        return Ok(LinkFetchOutcome::InFlight {
            bank_link_id: link_id,
        });
    }

    let session = start_fetch(link_id, None, None, state).await?;
    if session.status == SessionStatus::Ready {
        queue.enqueue(&session.aa_session_id);
    }

    Ok(LinkFetchOutcome::Opened {
        bank_link_id: link_id,
        aa_session_id: session.aa_session_id,
    })
}
