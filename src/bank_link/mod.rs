//! Bank links track one consent relationship between a user and a financial institution.
//!
//! This module contains:
//! - The `BankLink` model, its `LinkStatus` and database queries
//! - The compare-and-set state machine that every status change goes through
//! - Consent operations that call the aggregator: initiate, revoke and reconcile
//! - Route handlers for those operations and for opening a data session

mod consent;
mod core;
mod endpoints;
mod state_machine;
mod status;

pub use consent::{apply_reported_status, initiate_consent, reconcile_link, revoke_link};
pub use core::{
    BankLink, NewBankLink, create_bank_link, create_bank_link_table, get_bank_link,
    get_bank_link_by_consent_id, get_bank_links_by_status, get_bank_links_for_user,
};
pub use endpoints::{
    get_bank_links_endpoint, initiate_consent_endpoint, reconcile_link_endpoint, revoke_link_endpoint,
    start_fetch_endpoint,
};
pub use state_machine::{TransitionOutcome, ensure_link_active, transition_link};
pub use status::LinkStatus;
