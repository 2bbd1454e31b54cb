//! Routes verified webhook events to the consent and session state machines.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    bank_link::{LinkStatus, TransitionOutcome, apply_reported_status, get_bank_link_by_consent_id},
    fetch::FetchQueue,
    session::{SessionStatus, get_data_session, mark_session_failed, mark_session_ready},
    webhook::{EventKind, WebhookEvent},
};

/// What a verified event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event changed the state of a bank link or session, or confirmed it.
    Applied,
    /// A session was marked ready and handed to the fetch worker.
    Queued,
    /// The event was acknowledged without effect, e.g. an unknown type or a stale transition.
    Ignored,
}

/// The parts of a consent event's payload that are acted on.
#[derive(Debug, Default, Deserialize)]
struct ConsentPayload {
    #[serde(default, with = "time::serde::rfc3339::option")]
    valid_till: Option<OffsetDateTime>,
}

/// Apply a verified `event`.
///
/// Redelivering an event is harmless: a repeated status update is a no-op and a repeated
/// `DATA_READY` finds the session already ready or ingested and queues nothing. A `DATA_READY`
/// event whose status is not a known session status is taken to mean the data is ready.
///
/// # Errors
/// This function will return a:
/// - [Error::MalformedRequest] if a `DATA_READY` event has no session ID,
/// - or [Error::SqlError] if there is an SQL error.
pub fn dispatch_event(
    event: &WebhookEvent,
    connection: &Connection,
    queue: &FetchQueue,
) -> Result<WebhookOutcome, Error> {
    let outcome = match event.kind() {
        EventKind::ConsentStatusUpdate => apply_consent_update(event, connection),
        EventKind::DataReady => apply_data_ready(event, connection, queue),
        EventKind::Unknown => {
            tracing::warn!(
                "ignoring webhook event of unknown type \"{}\" for consent {}",
                event.event_type,
                event.consent_id
            );
            return Ok(WebhookOutcome::Ignored);
        }
    };

    match outcome {
        Err(Error::NotFound) => {
            tracing::warn!(
                "ignoring {} event for unknown consent or session (consent {}, session {:?})",
                event.event_type,
                event.consent_id,
                event.session_id
            );
            Ok(WebhookOutcome::Ignored)
        }
        Err(Error::InvalidTransition { from, to }) => {
            tracing::warn!(
                "ignoring {} event for consent {}: cannot move from {from} to {to}",
                event.event_type,
                event.consent_id
            );
            Ok(WebhookOutcome::Ignored)
        }
        other => other,
    }
}

fn apply_consent_update(
    event: &WebhookEvent,
    connection: &Connection,
) -> Result<WebhookOutcome, Error> {
    let reported: LinkStatus = match event.status.parse() {
        Ok(status) => status,
        Err(error) => {
            tracing::warn!("ignoring consent event for {}: {error}", event.consent_id);
            return Ok(WebhookOutcome::Ignored);
        }
    };

    let valid_till = serde_json::from_str::<ConsentPayload>(event.payload.get())
        .inspect_err(|error| {
            tracing::debug!(
                "consent event payload for {} has no usable validity: {error}",
                event.consent_id
            );
        })
        .unwrap_or_default()
        .valid_till;

    let (link, outcome) = apply_reported_status(&event.consent_id, reported, valid_till, connection)?;

    match outcome {
        TransitionOutcome::Applied { from, to } => {
            tracing::info!("bank link {} moved from {from} to {to} by webhook", link.id)
        }
        TransitionOutcome::Unchanged(status) => {
            tracing::debug!("bank link {} is already {status}", link.id)
        }
    }

    Ok(WebhookOutcome::Applied)
}

fn apply_data_ready(
    event: &WebhookEvent,
    connection: &Connection,
    queue: &FetchQueue,
) -> Result<WebhookOutcome, Error> {
    let aa_session_id = event.session_id.as_deref().ok_or_else(|| {
        Error::MalformedRequest("DATA_READY event is missing the session_id".to_owned())
    })?;

    let link = get_bank_link_by_consent_id(&event.consent_id, connection)?;
    let session = get_data_session(aa_session_id, connection)?;

    if session.bank_link_id != link.id {
        tracing::warn!(
            "ignoring DATA_READY event: session {aa_session_id} does not belong to consent {}",
            event.consent_id
        );
        return Ok(WebhookOutcome::Ignored);
    }

    // The event announces the data, only an explicit failure or pending status overrides it.
    let reported: SessionStatus = match event.status.parse() {
        Ok(status) => status,
        Err(error) => {
            tracing::debug!(
                "treating DATA_READY event for session {aa_session_id} as ready: {error}"
            );
            SessionStatus::Ready
        }
    };

    match reported {
        SessionStatus::Ready if mark_session_ready(aa_session_id, connection)? => {
            tracing::info!("data session {aa_session_id} for bank link {} is ready", link.id);
            queue.enqueue(aa_session_id);
            Ok(WebhookOutcome::Queued)
        }
        SessionStatus::Ready => {
            tracing::debug!("data session {aa_session_id} is not pending, nothing to queue");
            Ok(WebhookOutcome::Ignored)
        }
        SessionStatus::Failed if mark_session_failed(aa_session_id, connection)? => {
            Ok(WebhookOutcome::Applied)
        }
        SessionStatus::Failed | SessionStatus::Pending => Ok(WebhookOutcome::Ignored),
    }
}
