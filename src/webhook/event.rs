use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// An event the aggregator posts to the webhook endpoint.
///
/// `payload` is kept as the exact JSON text that was received because the signature covers
/// those bytes, re-serializing it could change key order or whitespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub consent_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub status: String,
    pub timestamp: String,
    pub payload: Box<RawValue>,
    #[serde(default)]
    pub signature: String,
}

impl WebhookEvent {
    /// Create an unsigned event, see [sign_event](crate::webhook::sign_event).
    pub fn new(
        event_type: &str,
        consent_id: &str,
        session_id: Option<&str>,
        status: &str,
        timestamp: &str,
        payload: Box<RawValue>,
    ) -> Self {
        Self {
            event_type: event_type.to_owned(),
            consent_id: consent_id.to_owned(),
            session_id: session_id.map(str::to_owned),
            status: status.to_owned(),
            timestamp: timestamp.to_owned(),
            payload,
            signature: String::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from(self.event_type.as_str())
    }
}

/// The event types the webhook ingestor acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The aggregator reports a new status for a consent.
    ConsentStatusUpdate,
    /// The data of a session can be fetched, or the session failed.
    DataReady,
    /// Any event type added by the aggregator after this code was written.
    Unknown,
}

impl From<&str> for EventKind {
    fn from(event_type: &str) -> Self {
        match event_type.trim() {
            "CONSENT_STATUS_UPDATE" => EventKind::ConsentStatusUpdate,
            "DATA_READY" => EventKind::DataReady,
            _ => EventKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventKind, WebhookEvent};

    #[test]
    fn payload_keeps_received_text() {
        let body = r#"{"event_type":"DATA_READY","consent_id":"c-1","session_id":"s-1",
            "status":"READY","timestamp":"2025-01-10T09:00:00Z",
            "payload":{"b": 1,  "a": [2]},"signature":"00"}"#;

        let event: WebhookEvent = serde_json::from_str(body).unwrap();

        assert_eq!(event.payload.get(), r#"{"b": 1,  "a": [2]}"#);
        assert_eq!(event.kind(), EventKind::DataReady);
    }

    #[test]
    fn missing_session_id_is_allowed() {
        let body = r#"{"event_type":"CONSENT_STATUS_UPDATE","consent_id":"c-1",
            "status":"ACTIVE","timestamp":"2025-01-10T09:00:00Z","payload":{},"signature":"00"}"#;

        let event: WebhookEvent = serde_json::from_str(body).unwrap();

        assert_eq!(event.session_id, None);
        assert_eq!(event.kind(), EventKind::ConsentStatusUpdate);
    }

    #[test]
    fn unrecognized_types_are_unknown() {
        assert_eq!(EventKind::from("ACCOUNT_LINKED"), EventKind::Unknown);
        assert_eq!(EventKind::from("data_ready"), EventKind::Unknown);
    }
}
