//! Applies consent lifecycle transitions to bank links.
//!
//! Every transition is a compare-and-set keyed by the link ID: the current status is read, checked
//! against the legal sources for the target, and written back with an `UPDATE` that only matches
//! if the status is still the one that was read. Concurrent requests for the same link therefore
//! cannot both move it, and requests for different links never wait on each other.

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    Error,
    bank_link::{BankLink, LinkStatus, get_bank_link},
    database_id::BankLinkId,
};

/// The result of a transition request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The link moved from `from` to `to`.
    Applied { from: LinkStatus, to: LinkStatus },
    /// The link was already in the requested status.
    Unchanged(LinkStatus),
}

/// Move the bank link `link_id` to `target`.
///
/// If `valid_till` is given it replaces the stored validity expiry in the same write.
///
/// Requesting the status the link already has is a successful no-op, which makes redelivered
/// webhooks harmless.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidTransition] if the link's current status is not a legal source for `target`,
///   the link is left untouched,
/// - [Error::NotFound] if `link_id` does not refer to a bank link,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn transition_link(
    link_id: BankLinkId,
    target: LinkStatus,
    valid_till: Option<OffsetDateTime>,
    connection: &Connection,
) -> Result<TransitionOutcome, Error> {
    loop {
        let current = get_bank_link(link_id, connection)?.status;

        if current == target {
            tracing::debug!("bank link {link_id} is already {target}, ignoring transition request");
            return Ok(TransitionOutcome::Unchanged(current));
        }

        if !current.can_transition_to(target) {
            tracing::warn!(
                "rejected transition of bank link {link_id} from {current} to {target}, \
                 possibly an out-of-order or duplicate delivery"
            );
            return Err(Error::InvalidTransition {
                from: current,
                to: target,
            });
        }

        let rows_affected = connection.execute(
            "UPDATE bank_link SET status = ?1, valid_till = COALESCE(?2, valid_till), updated_at = ?3 \
             WHERE id = ?4 AND status = ?5",
            (
                target,
                valid_till,
                OffsetDateTime::now_utc(),
                link_id,
                current,
            ),
        )?;

        if rows_affected == 1 {
            tracing::info!("bank link {link_id} moved from {current} to {target}");
            return Ok(TransitionOutcome::Applied {
                from: current,
                to: target,
            });
        }

        // Another writer moved the link between the read and the write. Statuses only move
        // forward, so re-reading terminates after at most a couple of rounds.
        tracing::debug!("bank link {link_id} changed while moving to {target}, retrying");
    }
}

/// Check that `link` may be used to fetch data at `now`.
///
/// A link whose validity window has elapsed is moved to `EXPIRED` before being rejected, so the
/// expiry is observed by every later fetch as well.
///
/// # Errors
/// This function will return a:
/// - [Error::ConsentNotActive] if the link is not `ACTIVE` or has expired,
/// - or [Error::SqlError] if the expiry could not be recorded.
pub fn ensure_link_active(
    link: &BankLink,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    if link.status != LinkStatus::Active {
        return Err(Error::ConsentNotActive);
    }

    if link.is_past_validity(now) {
        tracing::info!(
            "consent for bank link {} lapsed at {:?}, marking it expired",
            link.id,
            link.valid_till
        );
        match transition_link(link.id, LinkStatus::Expired, None, connection) {
            // A concurrent revoke got there first, the link is still unusable.
            Ok(_) | Err(Error::InvalidTransition { .. }) => {}
            Err(error) => return Err(error),
        }
        return Err(Error::ConsentNotActive);
    }

    Ok(())
}
