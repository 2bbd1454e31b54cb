use axum::{
    Json,
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    AppState, Error,
    db::lock_connection,
    webhook::{WebhookEvent, dispatch_event, verify_signature},
};

/// A route handler for the aggregator's webhook deliveries.
///
/// The body is parsed by hand rather than with the `Json` extractor so that malformed input gets
/// the same JSON error body as every other failure. Responds with:
/// - 400 if the body is not a webhook event,
/// - 401 if the signature does not verify, nothing is changed,
/// - 200 with `{"status": outcome}` for every verified event, including ignored ones, so that the
///   aggregator stops redelivering them.
pub async fn webhook_endpoint(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, Error> {
    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|error| {
        tracing::warn!("rejecting malformed webhook body: {error}");
        Error::MalformedRequest(format!("invalid webhook event: {error}"))
    })?;

    verify_signature(&state.config.webhook_secret, &event).inspect_err(|_| {
        tracing::warn!(
            "rejecting {} event for consent {} with an invalid signature",
            event.event_type,
            event.consent_id
        );
    })?;

    let outcome = {
        let connection = lock_connection(&state.db_connection)?;
        dispatch_event(&event, &connection, &state.fetch_queue)?
    };

    tracing::debug!(
        "{} event for consent {} was {outcome:?}",
        event.event_type,
        event.consent_id
    );

    Ok(Json(json!({ "status": outcome })).into_response())
}
