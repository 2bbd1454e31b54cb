//! Maps provider-native transaction records into canonical transactions.

use serde_json::{Map, Value};
use time::{
    Date, OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
    macros::format_description,
};

use crate::{
    Error,
    bank_link::BankLink,
    provider::RawTransaction,
    transaction::{Direction, NewTransaction},
};

/// The outcome of normalizing one provider batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    /// The records that passed validation, in provider order.
    pub transactions: Vec<NewTransaction>,
    /// How many records were dropped as malformed.
    pub skipped: usize,
}

/// Normalize every record in `records` for the owner of `link`.
///
/// A malformed record is logged and skipped without affecting its siblings.
pub fn normalize_batch(
    records: &[RawTransaction],
    link: &BankLink,
    default_currency: &str,
) -> NormalizedBatch {
    let mut transactions = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for (index, record) in records.iter().enumerate() {
        match normalize_record(record, link, default_currency) {
            Ok(transaction) => transactions.push(transaction),
            Err(error) => {
                tracing::warn!(
                    "skipping record {index} (txn_id {:?}) for bank link {}: {error}",
                    record.txn_id,
                    link.id
                );
                skipped += 1;
            }
        }
    }

    NormalizedBatch {
        transactions,
        skipped,
    }
}

/// Map one provider record into a transaction skeleton without identity hash or category.
///
/// # Errors
/// Returns [Error::MalformedRecord] if the record could not be decoded, the posted timestamp
/// is missing or unparsable, the direction is not DEBIT or CREDIT, or a numeric or date field
/// cannot be parsed.
pub fn normalize_record(
    record: &RawTransaction,
    link: &BankLink,
    default_currency: &str,
) -> Result<NewTransaction, Error> {
    if let Some(decode_error) = &record.decode_error {
        return Err(Error::MalformedRecord(decode_error.clone()));
    }

    let posted_at = trimmed(&record.transaction_timestamp)
        .ok_or_else(|| Error::MalformedRecord("missing posted timestamp".to_owned()))
        .and_then(|raw| parse_timestamp(&raw))?;

    let value_date = trimmed(&record.value_date)
        .map(|raw| parse_date(&raw))
        .transpose()?;

    let direction: Direction = trimmed(&record.txn_type)
        .ok_or_else(|| Error::MalformedRecord("missing transaction type".to_owned()))?
        .parse()?;

    let amount = trimmed(&record.amount)
        .ok_or_else(|| Error::MalformedRecord("missing amount".to_owned()))
        .and_then(|raw| parse_amount(&raw))?;

    let balance_after = trimmed(&record.current_balance)
        .map(|raw| parse_amount(&raw))
        .transpose()?;

    let currency = trimmed(&record.currency)
        .map(|currency| currency.to_ascii_uppercase())
        .unwrap_or_else(|| default_currency.to_owned());

    Ok(NewTransaction {
        user_id: link.user_id,
        bank_link_id: Some(link.id),
        posted_at,
        value_date,
        amount,
        currency,
        direction,
        balance_after,
        description_raw: trimmed(&record.narration).unwrap_or_default(),
        merchant_name: trimmed(&record.merchant),
        account_ref: trimmed(&record.masked_account),
        category: None,
        subcategory: None,
        source_meta: source_meta(record),
    })
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Parse a provider timestamp into UTC.
///
/// Accepts RFC 3339, a date and time without an offset (taken as UTC), or a bare date
/// (midnight UTC). The instant is kept as given, it is not bucketed.
fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, Error> {
    if let Ok(timestamp) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(timestamp.to_offset(time::UtcOffset::UTC));
    }

    let without_offset = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ];
    for format in without_offset {
        if let Ok(timestamp) = PrimitiveDateTime::parse(raw, format) {
            return Ok(timestamp.assume_utc());
        }
    }

    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| Error::MalformedRecord(format!("unparsable timestamp \"{raw}\"")))
}

fn parse_date(raw: &str) -> Result<Date, Error> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| parse_timestamp(raw).map(|timestamp| timestamp.date()))
        .map_err(|_| Error::MalformedRecord(format!("unparsable date \"{raw}\"")))
}

fn parse_amount(raw: &str) -> Result<f64, Error> {
    raw.parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
        .ok_or_else(|| Error::MalformedRecord(format!("unparsable amount \"{raw}\"")))
}

fn source_meta(record: &RawTransaction) -> Value {
    let mut meta = Map::new();

    for (key, value) in &record.extra {
        let value = match value {
            Value::String(text) => Value::String(text.trim().to_owned()),
            other => other.clone(),
        };
        meta.insert(key.clone(), value);
    }

    let known = [
        ("txn_id", &record.txn_id),
        ("reference", &record.reference),
        ("mode", &record.mode),
    ];
    for (key, value) in known {
        if let Some(value) = trimmed(value) {
            meta.insert(key.to_owned(), Value::String(value));
        }
    }

    Value::Object(meta)
}
