use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    Error,
    app_state::PipelineState,
    database_id::{TransactionId, UserId},
    db::lock_connection,
    transaction::{get_transaction, get_transactions_for_user, set_transaction_category},
};

/// A route handler for listing a user's transactions, most recently posted first.
pub async fn get_transactions_endpoint(
    State(state): State<PipelineState>,
    Path(user_id): Path<UserId>,
) -> Result<Response, Error> {
    let connection = lock_connection(&state.db_connection)?;
    let transactions = get_transactions_for_user(user_id, &connection)?;

    Ok(Json(transactions).into_response())
}

/// The category a user assigns to one transaction. A missing category clears it.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryForm {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// A route handler for explicitly setting the category of a transaction.
pub async fn set_transaction_category_endpoint(
    State(state): State<PipelineState>,
    Path((user_id, transaction_id)): Path<(UserId, TransactionId)>,
    Json(form): Json<CategoryForm>,
) -> Result<Response, Error> {
    let category = form
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty());
    let subcategory = form
        .subcategory
        .as_deref()
        .map(str::trim)
        .filter(|subcategory| !subcategory.is_empty());

    let connection = lock_connection(&state.db_connection)?;
    set_transaction_category(transaction_id, user_id, category, subcategory, &connection)?;
    let transaction = get_transaction(transaction_id, &connection)?;

    Ok(Json(transaction).into_response())
}
