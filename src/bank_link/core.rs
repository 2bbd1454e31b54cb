//! Defines the bank link model and its database queries.

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    bank_link::LinkStatus,
    database_id::{BankLinkId, UserId},
};

// ============================================================================
// MODELS
// ============================================================================

/// One consent relationship between a user and a financial institution.
///
/// A bank link is never deleted. Revoking or expiring the consent is the delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankLink {
    pub id: BankLinkId,
    pub user_id: UserId,
    /// The consent identifier assigned by the aggregator.
    pub aa_consent_id: String,
    /// The institution or account type tag, e.g. "DEPOSIT".
    pub fi_type: String,
    pub status: LinkStatus,
    /// When the consent stops granting access, if the aggregator told us.
    #[serde(with = "time::serde::rfc3339::option")]
    pub valid_till: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl BankLink {
    /// Whether the consent validity window has elapsed at `now`.
    pub fn is_past_validity(&self, now: OffsetDateTime) -> bool {
        self.valid_till.is_some_and(|valid_till| valid_till <= now)
    }
}

/// The data needed to record a newly initiated consent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBankLink {
    pub user_id: UserId,
    pub aa_consent_id: String,
    pub fi_type: String,
    pub valid_till: Option<OffsetDateTime>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, aa_consent_id, fi_type, status, valid_till, created_at, updated_at \
     FROM bank_link";

/// Create the bank link table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_bank_link_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS bank_link (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                aa_consent_id TEXT NOT NULL UNIQUE,
                fi_type TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('PENDING', 'ACTIVE', 'REVOKED', 'EXPIRED')),
                valid_till TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
                )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_bank_link_status ON bank_link(status);",
        (),
    )?;

    Ok(())
}

/// Record a newly initiated consent as a `PENDING` bank link.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error,
/// e.g. the consent ID is already linked.
pub fn create_bank_link(link: NewBankLink, connection: &Connection) -> Result<BankLink, Error> {
    let now = OffsetDateTime::now_utc();

    connection
        .prepare(
            "INSERT INTO bank_link (user_id, aa_consent_id, fi_type, status, valid_till, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             RETURNING id, user_id, aa_consent_id, fi_type, status, valid_till, created_at, updated_at",
        )?
        .query_row(
            (
                link.user_id,
                link.aa_consent_id,
                link.fi_type,
                LinkStatus::Pending,
                link.valid_till,
                now,
            ),
            map_bank_link_row,
        )
        .map_err(Error::from)
}

/// Retrieve a bank link by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a bank link,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_bank_link(id: BankLinkId, connection: &Connection) -> Result<BankLink, Error> {
    connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE id = :id"))?
        .query_row(&[(":id", &id)], map_bank_link_row)
        .map_err(Error::from)
}

/// Retrieve the bank link tracking the aggregator consent `aa_consent_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if no link tracks that consent,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_bank_link_by_consent_id(
    aa_consent_id: &str,
    connection: &Connection,
) -> Result<BankLink, Error> {
    connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE aa_consent_id = :consent_id"))?
        .query_row(&[(":consent_id", &aa_consent_id)], map_bank_link_row)
        .map_err(Error::from)
}

/// Retrieve all bank links with the given `status`, oldest first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_bank_links_by_status(
    status: LinkStatus,
    connection: &Connection,
) -> Result<Vec<BankLink>, Error> {
    connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id ASC"))?
        .query_map([status], map_bank_link_row)?
        .map(|maybe_link| maybe_link.map_err(Error::from))
        .collect()
}

/// Retrieve all bank links owned by `user_id`.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_bank_links_for_user(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<BankLink>, Error> {
    connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY id ASC"))?
        .query_map([user_id], map_bank_link_row)?
        .map(|maybe_link| maybe_link.map_err(Error::from))
        .collect()
}

/// Map a database row to a [BankLink].
pub fn map_bank_link_row(row: &Row) -> Result<BankLink, rusqlite::Error> {
    Ok(BankLink {
        id: row.get(0)?,
        user_id: row.get(1)?,
        aa_consent_id: row.get(2)?,
        fi_type: row.get(3)?,
        status: row.get(4)?,
        valid_till: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::{Duration, OffsetDateTime};

    use crate::{
        Error,
        bank_link::{
            LinkStatus, NewBankLink, create_bank_link, get_bank_link, get_bank_link_by_consent_id,
            get_bank_links_by_status,
        },
        db::initialize,
    };

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn new_link(consent_id: &str) -> NewBankLink {
        NewBankLink {
            user_id: 1,
            aa_consent_id: consent_id.to_owned(),
            fi_type: "DEPOSIT".to_owned(),
            valid_till: None,
        }
    }

    #[test]
    fn create_starts_pending() {
        let connection = get_test_connection();

        let link = create_bank_link(new_link("consent-1"), &connection).unwrap();

        assert_eq!(link.status, LinkStatus::Pending);
        assert_eq!(get_bank_link(link.id, &connection).unwrap(), link);
    }

    #[test]
    fn create_rejects_duplicate_consent_id() {
        let connection = get_test_connection();
        create_bank_link(new_link("consent-1"), &connection).unwrap();

        let result = create_bank_link(new_link("consent-1"), &connection);

        assert!(matches!(result, Err(Error::SqlError(_))), "got {result:?}");
    }

    #[test]
    fn get_by_consent_id() {
        let connection = get_test_connection();
        let link = create_bank_link(new_link("consent-abc"), &connection).unwrap();

        let got = get_bank_link_by_consent_id("consent-abc", &connection).unwrap();

        assert_eq!(got.id, link.id);
        assert_eq!(
            get_bank_link_by_consent_id("missing", &connection),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn get_by_status_filters() {
        let connection = get_test_connection();
        create_bank_link(new_link("a"), &connection).unwrap();
        create_bank_link(new_link("b"), &connection).unwrap();

        let pending = get_bank_links_by_status(LinkStatus::Pending, &connection).unwrap();
        let active = get_bank_links_by_status(LinkStatus::Active, &connection).unwrap();

        assert_eq!(pending.len(), 2);
        assert!(active.is_empty());
    }

    #[test]
    fn validity_window() {
        let connection = get_test_connection();
        let now = OffsetDateTime::now_utc();
        let mut link = create_bank_link(new_link("a"), &connection).unwrap();

        assert!(!link.is_past_validity(now));

        link.valid_till = Some(now - Duration::minutes(1));
        assert!(link.is_past_validity(now));

        link.valid_till = Some(now + Duration::days(1));
        assert!(!link.is_past_validity(now));
    }
}
