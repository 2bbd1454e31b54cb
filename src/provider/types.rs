//! Request and response shapes exchanged with the aggregator.

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime};

use crate::{bank_link::LinkStatus, database_id::UserId, session::SessionStatus};

/// What the caller asks the aggregator to consent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub user_id: UserId,
    /// The institution or account type tag, e.g. "DEPOSIT".
    pub fi_type: String,
    /// Why the data is requested, e.g. "PERSONAL_FINANCE".
    pub purpose: String,
    pub from_date: Date,
    pub to_date: Date,
    /// How often data may be fetched, e.g. "DAILY".
    pub frequency: String,
    /// Where the aggregator sends the user after they approve the consent.
    pub redirect_url: String,
    /// Where the aggregator delivers webhook events for this consent.
    pub webhook_url: String,
}

/// The aggregator's view of a newly created consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentHandle {
    pub consent_id: String,
    /// The URL the user must visit to approve the consent.
    pub redirect_url: String,
    pub status: LinkStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub valid_till: Option<OffsetDateTime>,
}

/// The aggregator's view of a data session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub status: SessionStatus,
}

/// One transaction as the aggregator reports it, before normalization.
///
/// Every field is optional here, validation is the normalizer's job. Identifiers and amounts
/// may arrive as JSON strings or numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default, deserialize_with = "string_or_number")]
    pub txn_id: Option<String>,
    /// When the transaction was posted, either an RFC 3339 timestamp or a date.
    #[serde(default)]
    pub transaction_timestamp: Option<String>,
    #[serde(default)]
    pub value_date: Option<String>,
    /// The amount as a decimal string, e.g. "1250.00".
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// "DEBIT" or "CREDIT" in any case.
    #[serde(default, rename = "type")]
    pub txn_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub current_balance: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    /// The masked account number, e.g. "XXXXXX1234".
    #[serde(default)]
    pub masked_account: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub reference: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Anything else the provider sent, kept opaque.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
    /// Why the record could not be decoded, if it could not.
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl RawTransaction {
    /// Decode one record from the aggregator's response.
    ///
    /// A record that does not fit the expected shape becomes an empty record carrying the
    /// decode error, so that it is skipped by the normalizer instead of failing its batch.
    pub fn from_value(value: Value) -> Self {
        let txn_id = value.get("txn_id").and_then(scalar_to_string);

        match serde_json::from_value(value) {
            Ok(record) => record,
            Err(error) => Self {
                txn_id,
                decode_error: Some(error.to_string()),
                ..Default::default()
            },
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => scalar_to_string(&value).map(Some).ok_or_else(|| {
            D::Error::custom(format!("expected a string or a number, found {value}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::RawTransaction;

    #[test]
    fn numeric_fields_are_read_as_text() {
        let record = RawTransaction::from_value(json!({
            "txn_id": 9001,
            "amount": 120.5,
            "current_balance": "880.00",
            "type": "DEBIT",
        }));

        assert_eq!(record.decode_error, None);
        assert_eq!(record.txn_id.as_deref(), Some("9001"));
        assert_eq!(record.amount.as_deref(), Some("120.5"));
        assert_eq!(record.current_balance.as_deref(), Some("880.00"));
    }

    #[test]
    fn record_of_wrong_shape_keeps_decode_error() {
        let record = RawTransaction::from_value(json!({
            "txn_id": "T9",
            "amount": { "value": "10.00" },
        }));

        assert!(record.decode_error.is_some());
        assert_eq!(record.txn_id.as_deref(), Some("T9"));
        assert_eq!(record.amount, None);

        let record = RawTransaction::from_value(json!("not a record"));
        assert!(record.decode_error.is_some());
    }

    #[test]
    fn null_fields_are_missing() {
        let record = RawTransaction::from_value(json!({ "amount": null, "narration": null }));

        assert_eq!(record, RawTransaction::default());
    }
}
