//! Route handlers for consent operations and on-demand fetches.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use time::Date;

use crate::{
    AppState, Error,
    app_state::PipelineState,
    bank_link::{get_bank_link, get_bank_links_for_user, initiate_consent, reconcile_link, revoke_link},
    database_id::{BankLinkId, UserId},
    db::lock_connection,
    fetch::start_fetch,
    provider::ConsentRequest,
    session::SessionStatus,
};

/// The user a request acts for. Authentication happens in front of this service.
#[derive(Debug, Clone, Deserialize)]
pub struct UserForm {
    pub user_id: UserId,
}

/// The optional date range of an on-demand fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchRange {
    #[serde(default)]
    pub from_date: Option<Date>,
    #[serde(default)]
    pub to_date: Option<Date>,
}

/// A route handler for initiating a consent with the aggregator.
///
/// Responds with the new bank link and the URL the user must visit to approve the consent.
pub async fn initiate_consent_endpoint(
    State(state): State<PipelineState>,
    Json(request): Json<ConsentRequest>,
) -> Result<Response, Error> {
    let (link, handle) = initiate_consent(&request, &state).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "bank_link": link, "consent": handle })),
    )
        .into_response())
}

/// A route handler for revoking the consent behind a bank link.
pub async fn revoke_link_endpoint(
    State(state): State<PipelineState>,
    Path(link_id): Path<BankLinkId>,
    Json(form): Json<UserForm>,
) -> Result<Response, Error> {
    let link = revoke_link(form.user_id, link_id, &state).await?;

    Ok(Json(link).into_response())
}

/// A route handler for re-reading a consent's status from the aggregator.
pub async fn reconcile_link_endpoint(
    State(state): State<PipelineState>,
    Path(link_id): Path<BankLinkId>,
) -> Result<Response, Error> {
    reconcile_link(link_id, &state).await?;

    let connection = lock_connection(&state.db_connection)?;
    let link = get_bank_link(link_id, &connection)?;

    Ok(Json(link).into_response())
}

/// A route handler for opening a data session for a bank link outside the schedule.
///
/// Responds with 202 and the tracked session, the data arrives later.
pub async fn start_fetch_endpoint(
    State(state): State<AppState>,
    Path(link_id): Path<BankLinkId>,
    Query(range): Query<FetchRange>,
) -> Result<Response, Error> {
    let session = start_fetch(link_id, range.from_date, range.to_date, &state.pipeline()).await?;

    if session.status == SessionStatus::Ready {
        state.fetch_queue.enqueue(&session.aa_session_id);
    }

    Ok((StatusCode::ACCEPTED, Json(session)).into_response())
}

/// A route handler for listing a user's bank links.
pub async fn get_bank_links_endpoint(
    State(state): State<PipelineState>,
    Path(user_id): Path<UserId>,
) -> Result<Response, Error> {
    let connection = lock_connection(&state.db_connection)?;
    let links = get_bank_links_for_user(user_id, &connection)?;

    Ok(Json(links).into_response())
}
