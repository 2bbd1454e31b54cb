//! Database ID type definitions.

/// Alias for the integer type used for mapping to database IDs.
pub type DatabaseId = i64;
/// The ID of the user that owns bank links, transactions and category overrides.
pub type UserId = i64;
pub type BankLinkId = i64;
pub type TransactionId = i64;
pub type DataSessionId = i64;
pub type CategoryOverrideId = i64;
