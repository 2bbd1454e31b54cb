//! User category overrides and the matcher that applies them.
//!
//! This module contains:
//! - The `CategoryOverride` model and its database queries
//! - `CategoryRules`, which assigns the first matching rule's category to a transaction
//! - Re-evaluation of stored transactions and the route handlers for managing rules

mod db;
mod endpoints;
mod matcher;
mod models;

pub use db::{
    create_category_override, create_category_override_table, delete_category_override,
    get_category_overrides, recategorize_transactions,
};
pub use endpoints::{
    create_category_override_endpoint, delete_category_override_endpoint,
    get_category_overrides_endpoint, recategorize_endpoint,
};
pub use matcher::{CategoryRules, Matcher};
pub use models::{
    CategorizationResult, CategoryOverride, CategoryOverrideForm, RecategorizeMode,
};
