//! Computes the identity hash that collapses duplicate ingestions of the same financial event.

use sha2::{Digest, Sha256};
use time::{UtcOffset, format_description::well_known::Rfc3339};

use crate::transaction::NewTransaction;

/// Separates fields in the hashed projection so that adjacent fields cannot run together.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Compute the identity hash of `transaction` as a lowercase hex SHA-256 digest.
///
/// The hash covers the owning user, account reference, posted timestamp, absolute amount,
/// direction and normalized description. Volatile fields such as the balance after the
/// transaction and provider metadata are left out, so the same event fetched twice with
/// cosmetic differences hashes the same.
pub fn compute_identity(transaction: &NewTransaction) -> String {
    let posted_at = transaction
        .posted_at
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| transaction.posted_at.unix_timestamp_nanos().to_string());
    // `abs` maps -0.0 to 0.0 so both spellings of zero agree.
    let amount = transaction.amount.abs().to_string();
    let user_id = transaction.user_id.to_string();
    let description = normalize_description(&transaction.description_raw);

    let fields: [&[u8]; 6] = [
        user_id.as_bytes(),
        transaction.account_ref.as_deref().unwrap_or("").as_bytes(),
        posted_at.as_bytes(),
        amount.as_bytes(),
        transaction.direction.as_str().as_bytes(),
        description.as_bytes(),
    ];

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field);
        hasher.update([FIELD_SEPARATOR]);
    }

    hex::encode(hasher.finalize())
}

/// Trim, collapse internal whitespace to single spaces, and case-fold.
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
