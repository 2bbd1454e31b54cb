//! Receives the aggregator's signed webhook events.
//!
//! This module contains:
//! - The `WebhookEvent` wire shape and its event kinds
//! - Signature generation and constant-time verification
//! - Dispatch of verified events to the consent and session state machines
//! - The route handler the aggregator posts events to

mod dispatch;
mod event;
mod handler;
mod signature;

pub use dispatch::{WebhookOutcome, dispatch_event};
pub use event::{EventKind, WebhookEvent};
pub use handler::webhook_endpoint;
pub use signature::{sign_event, verify_signature};
