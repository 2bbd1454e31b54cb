//! Tracks data sessions, the bounded fetch operations opened against an active consent.
//!
//! A session row lives only while a fetch is in flight. Status changes are conditional writes so
//! that a redelivered `DATA_READY` webhook, a status poll and the fetch worker can race on the
//! same session without double-processing it.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::{BankLinkId, DataSessionId},
};

/// The status of a data session.
///
/// `Ready` is followed by exactly one fetch and ingest, after which the session is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Ready,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Ready => "READY",
            SessionStatus::Failed => "FAILED",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(SessionStatus::Pending),
            "READY" | "COMPLETED" => Ok(SessionStatus::Ready),
            "FAILED" | "EXPIRED" => Ok(SessionStatus::Failed),
            other => Err(Error::MalformedRequest(format!(
                "unknown session status \"{other}\""
            ))),
        }
    }
}

impl ToSql for SessionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SessionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// A data session being tracked while its fetch is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSession {
    pub id: DataSessionId,
    pub bank_link_id: BankLinkId,
    /// The session identifier assigned by the aggregator.
    pub aa_session_id: String,
    pub status: SessionStatus,
    pub from_date: Date,
    pub to_date: Date,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

const SELECT_COLUMNS: &str = "SELECT id, bank_link_id, aa_session_id, status, from_date, to_date, \
     created_at, updated_at FROM data_session";

/// Create the data session table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_data_session_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS data_session (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bank_link_id INTEGER NOT NULL,
                aa_session_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL CHECK (status IN ('PENDING', 'READY', 'FAILED')),
                from_date TEXT NOT NULL,
                to_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(bank_link_id) REFERENCES bank_link(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Start tracking the aggregator session `aa_session_id` as `PENDING`.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn create_data_session(
    bank_link_id: BankLinkId,
    aa_session_id: &str,
    from_date: Date,
    to_date: Date,
    connection: &Connection,
) -> Result<DataSession, Error> {
    connection
        .prepare(
            "INSERT INTO data_session (bank_link_id, aa_session_id, status, from_date, to_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             RETURNING id, bank_link_id, aa_session_id, status, from_date, to_date, created_at, updated_at",
        )?
        .query_row(
            (
                bank_link_id,
                aa_session_id,
                SessionStatus::Pending,
                from_date,
                to_date,
                OffsetDateTime::now_utc(),
            ),
            map_data_session_row,
        )
        .map_err(Error::from)
}

/// Retrieve a tracked session by the aggregator's session ID.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the session is not tracked, e.g. it was already ingested,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_data_session(aa_session_id: &str, connection: &Connection) -> Result<DataSession, Error> {
    connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE aa_session_id = :session_id"))?
        .query_row(&[(":session_id", &aa_session_id)], map_data_session_row)
        .map_err(Error::from)
}

/// Retrieve all sessions for `bank_link_id` with the given `status`.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_data_sessions_for_link(
    bank_link_id: BankLinkId,
    status: SessionStatus,
    connection: &Connection,
) -> Result<Vec<DataSession>, Error> {
    connection
        .prepare(&format!(
            "{SELECT_COLUMNS} WHERE bank_link_id = ?1 AND status = ?2 ORDER BY id ASC"
        ))?
        .query_map((bank_link_id, status), map_data_session_row)?
        .map(|maybe_session| maybe_session.map_err(Error::from))
        .collect()
}

/// Move a `PENDING` session to `READY`.
///
/// Returns `true` if this call made the change, `false` if the session was not pending,
/// which is how duplicate `DATA_READY` deliveries are absorbed.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn mark_session_ready(aa_session_id: &str, connection: &Connection) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "UPDATE data_session SET status = ?1, updated_at = ?2 WHERE aa_session_id = ?3 AND status = ?4",
        (
            SessionStatus::Ready,
            OffsetDateTime::now_utc(),
            aa_session_id,
            SessionStatus::Pending,
        ),
    )?;

    Ok(rows_affected == 1)
}

/// Mark a session that has not been ingested as `FAILED`.
///
/// Returns `true` if this call made the change.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn mark_session_failed(aa_session_id: &str, connection: &Connection) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "UPDATE data_session SET status = ?1, updated_at = ?2 \
         WHERE aa_session_id = ?3 AND status IN (?4, ?5)",
        (
            SessionStatus::Failed,
            OffsetDateTime::now_utc(),
            aa_session_id,
            SessionStatus::Pending,
            SessionStatus::Ready,
        ),
    )?;

    if rows_affected == 1 {
        tracing::warn!("data session {aa_session_id} marked as failed");
    }

    Ok(rows_affected == 1)
}

/// Stop tracking a `READY` session whose transactions have been ingested.
///
/// Returns `true` if this call removed the session.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn discard_ready_session(aa_session_id: &str, connection: &Connection) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "DELETE FROM data_session WHERE aa_session_id = ?1 AND status = ?2",
        (aa_session_id, SessionStatus::Ready),
    )?;

    Ok(rows_affected == 1)
}

/// Map a database row to a [DataSession].
pub fn map_data_session_row(row: &Row) -> Result<DataSession, rusqlite::Error> {
    Ok(DataSession {
        id: row.get(0)?,
        bank_link_id: row.get(1)?,
        aa_session_id: row.get(2)?,
        status: row.get(3)?,
        from_date: row.get(4)?,
        to_date: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
