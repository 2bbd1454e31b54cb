//! Canonical transactions produced by the ingestion pipeline.
//!
//! This module contains:
//! - The `Transaction` model and the `NewTransaction` skeleton built by the normalizer
//! - Database functions for storing and querying transactions
//! - Route handlers for listing a user's transactions and overriding their category

mod core;
mod endpoints;

pub use core::{
    Direction, InsertOutcome, NewTransaction, Transaction, count_transactions,
    create_transaction_table, get_transaction, get_transactions_for_user, insert_transaction,
    map_transaction_row, set_transaction_category,
};
pub use endpoints::{get_transactions_endpoint, set_transaction_category_endpoint};
