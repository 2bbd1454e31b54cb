use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::database_id::{CategoryOverrideId, UserId};

/// A user rule that assigns a category to transactions whose merchant name or description
/// matches `matcher`.
///
/// A matcher wrapped in slashes, e.g. `/^uber\s+trip/`, is a case-insensitive regular
/// expression. Anything else is a case-insensitive substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOverride {
    pub id: CategoryOverrideId,
    pub user_id: UserId,
    pub matcher: String,
    pub category: String,
    pub subcategory: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Form data for creating a category override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOverrideForm {
    pub matcher: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// Describes which of a user's transactions a re-evaluation should touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecategorizeMode {
    /// Every transaction, replacing categories where a rule matches.
    All,
    /// Only transactions without a category.
    Uncategorized,
}

/// Result of re-evaluating category rules over stored transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizationResult {
    /// Number of transactions examined.
    pub transactions_processed: usize,
    /// Number of transactions that were assigned a category.
    pub transactions_categorized: usize,
}

impl CategorizationResult {
    pub fn empty() -> Self {
        Self {
            transactions_processed: 0,
            transactions_categorized: 0,
        }
    }
}
