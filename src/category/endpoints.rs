use std::time::Instant;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Transaction as SqlTransaction, TransactionBehavior};
use serde::Deserialize;

use crate::{
    Error,
    app_state::PipelineState,
    category::{
        CategoryOverrideForm, RecategorizeMode, create_category_override,
        delete_category_override, get_category_overrides, recategorize_transactions,
    },
    database_id::{CategoryOverrideId, UserId},
    db::lock_connection,
};

/// A route handler for creating a category override for a user.
pub async fn create_category_override_endpoint(
    State(state): State<PipelineState>,
    Path(user_id): Path<UserId>,
    Json(form): Json<CategoryOverrideForm>,
) -> Result<Response, Error> {
    let connection = lock_connection(&state.db_connection)?;
    let category_override = create_category_override(user_id, &form, &connection)?;

    tracing::info!(
        "created category override {} for user {user_id}",
        category_override.id
    );

    Ok((StatusCode::CREATED, Json(category_override)).into_response())
}

/// A route handler for listing a user's category overrides in the order they are applied.
pub async fn get_category_overrides_endpoint(
    State(state): State<PipelineState>,
    Path(user_id): Path<UserId>,
) -> Result<Response, Error> {
    let connection = lock_connection(&state.db_connection)?;
    let overrides = get_category_overrides(user_id, &connection)?;

    Ok(Json(overrides).into_response())
}

/// A route handler for deleting a category override.
pub async fn delete_category_override_endpoint(
    State(state): State<PipelineState>,
    Path((user_id, override_id)): Path<(UserId, CategoryOverrideId)>,
) -> Result<Response, Error> {
    let connection = lock_connection(&state.db_connection)?;
    delete_category_override(override_id, user_id, &connection)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecategorizeForm {
    #[serde(default = "default_mode")]
    pub mode: RecategorizeMode,
}

fn default_mode() -> RecategorizeMode {
    RecategorizeMode::Uncategorized
}

/// A route handler for re-applying a user's category overrides to their stored transactions.
pub async fn recategorize_endpoint(
    State(state): State<PipelineState>,
    Path(user_id): Path<UserId>,
    Json(form): Json<RecategorizeForm>,
) -> Result<Response, Error> {
    let start_time = Instant::now();

    let connection = lock_connection(&state.db_connection)?;
    let transaction = SqlTransaction::new_unchecked(&connection, TransactionBehavior::Immediate)?;
    let result = recategorize_transactions(user_id, form.mode, &transaction).inspect_err(|error| {
        tracing::error!(
            "Failed to recategorize transactions for user {user_id} after {}ms: {error}",
            start_time.elapsed().as_millis()
        );
    })?;
    transaction.commit()?;

    tracing::info!(
        "Recategorizing transactions for user {user_id} ({:?}) completed in {}ms: {} processed, {} categorized",
        form.mode,
        start_time.elapsed().as_millis(),
        result.transactions_processed,
        result.transactions_categorized
    );

    Ok(Json(result).into_response())
}
