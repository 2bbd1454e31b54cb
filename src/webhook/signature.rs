//! HMAC-SHA256 signatures over webhook events.
//!
//! The signed message is the event's fields joined with `.` in the order `event_type`,
//! `consent_id`, `session_id` (empty if absent), `status`, `timestamp` and the raw `payload`
//! JSON. The signature is the lowercase hex encoding of the MAC.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, webhook::WebhookEvent};

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, event: &WebhookEvent) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|error| {
        tracing::error!("could not key the webhook MAC: {error}");
        Error::InvalidSignature
    })?;

    let session_id = event.session_id.as_deref().unwrap_or_default();
    for (index, part) in [
        event.event_type.as_str(),
        event.consent_id.as_str(),
        session_id,
        event.status.as_str(),
        event.timestamp.as_str(),
        event.payload.get(),
    ]
    .into_iter()
    .enumerate()
    {
        if index > 0 {
            mac.update(b".");
        }
        mac.update(part.as_bytes());
    }

    Ok(mac)
}

/// Compute the signature the aggregator would attach to `event`, ignoring its current
/// `signature` field.
///
/// # Errors
/// Returns [Error::InvalidSignature] if the MAC cannot be keyed with `secret`.
pub fn sign_event(secret: &str, event: &WebhookEvent) -> Result<String, Error> {
    let mac = mac_for(secret, event)?;

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check that `event.signature` was produced with `secret`.
///
/// The comparison is constant time. An empty secret never verifies, so a server started without
/// one rejects every event instead of accepting forgeries.
///
/// # Errors
/// Returns [Error::InvalidSignature] if the signature is missing, not hex, or does not match.
pub fn verify_signature(secret: &str, event: &WebhookEvent) -> Result<(), Error> {
    if secret.is_empty() {
        tracing::error!("no webhook secret is configured, rejecting webhook event");
        return Err(Error::InvalidSignature);
    }

    let expected = hex::decode(event.signature.trim()).map_err(|_| Error::InvalidSignature)?;

    mac_for(secret, event)?
        .verify_slice(&expected)
        .map_err(|_| Error::InvalidSignature)
}
