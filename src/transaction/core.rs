//! Defines the core data models and database queries for transactions.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::{BankLinkId, TransactionId, UserId},
};

// ============================================================================
// MODELS
// ============================================================================

/// Whether money left or entered the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "DEBIT",
            Direction::Credit => "CREDIT",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBIT" => Ok(Direction::Debit),
            "CREDIT" => Ok(Direction::Credit),
            other => Err(Error::MalformedRecord(format!(
                "unknown transaction direction \"{other}\""
            ))),
        }
    }
}

impl ToSql for Direction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Direction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// One canonical financial event.
///
/// Transactions are only created by the ingestion pipeline and are immutable afterwards,
/// except for their category and subcategory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub bank_link_id: Option<BankLinkId>,
    #[serde(with = "time::serde::rfc3339")]
    pub posted_at: OffsetDateTime,
    pub value_date: Option<Date>,
    /// The amount with the sign the provider reported.
    pub amount: f64,
    pub currency: String,
    pub direction: Direction,
    pub balance_after: Option<f64>,
    pub description_raw: String,
    pub merchant_name: Option<String>,
    /// The masked account number the transaction was posted to.
    pub account_ref: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// The identity hash that makes ingesting the same event twice a no-op.
    pub hash_dedupe: String,
    /// Provider specific fields that are kept but not interpreted.
    pub source_meta: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A normalized transaction that has not been persisted yet.
///
/// The normalizer fills in everything except the identity hash and category,
/// which the deduplicator and category matcher add.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub bank_link_id: Option<BankLinkId>,
    pub posted_at: OffsetDateTime,
    pub value_date: Option<Date>,
    pub amount: f64,
    pub currency: String,
    pub direction: Direction,
    pub balance_after: Option<f64>,
    pub description_raw: String,
    pub merchant_name: Option<String>,
    pub account_ref: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub source_meta: Value,
}

impl NewTransaction {
    /// Create a transaction skeleton with the required fields, leaving the rest empty.
    ///
    /// Shortcut for building test fixtures and manual entries.
    pub fn build(
        user_id: UserId,
        posted_at: OffsetDateTime,
        amount: f64,
        direction: Direction,
        description: &str,
    ) -> Self {
        Self {
            user_id,
            bank_link_id: None,
            posted_at,
            value_date: None,
            amount,
            currency: crate::config::DEFAULT_CURRENCY.to_owned(),
            direction,
            balance_after: None,
            description_raw: description.to_owned(),
            merchant_name: None,
            account_ref: None,
            category: None,
            subcategory: None,
            source_meta: Value::Null,
        }
    }

    pub fn bank_link_id(mut self, bank_link_id: Option<BankLinkId>) -> Self {
        self.bank_link_id = bank_link_id;
        self
    }

    pub fn merchant_name(mut self, merchant_name: Option<&str>) -> Self {
        self.merchant_name = merchant_name.map(str::to_owned);
        self
    }

    pub fn account_ref(mut self, account_ref: Option<&str>) -> Self {
        self.account_ref = account_ref.map(str::to_owned);
        self
    }

    pub fn balance_after(mut self, balance_after: Option<f64>) -> Self {
        self.balance_after = balance_after;
        self
    }
}

/// Whether an insert created a row or found the same event already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransactionId),
    Duplicate,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const SELECT_COLUMNS: &str = "SELECT id, user_id, bank_link_id, posted_at, value_date, amount, currency, \
     txn_type, balance_after, description_raw, merchant_name, account_ref, category, subcategory, \
     hash_dedupe, source_meta, created_at, updated_at FROM \"transaction\"";

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                bank_link_id INTEGER,
                posted_at TEXT NOT NULL,
                value_date TEXT,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                txn_type TEXT NOT NULL CHECK (txn_type IN ('DEBIT', 'CREDIT')),
                balance_after REAL,
                description_raw TEXT NOT NULL,
                merchant_name TEXT,
                account_ref TEXT,
                category TEXT,
                subcategory TEXT,
                hash_dedupe TEXT NOT NULL UNIQUE,
                source_meta TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(bank_link_id) REFERENCES bank_link(id) ON UPDATE CASCADE ON DELETE SET NULL
                )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_posted ON \"transaction\"(user_id, posted_at);",
        (),
    )?;

    Ok(())
}

/// Insert a transaction unless one with the same identity hash already exists.
///
/// A duplicate is not an error, re-fetching an overlapping date range is expected.
///
/// **Note**: If you want all-or-nothing semantics for a batch, pass in a
/// transaction for `connection`.
///
/// # Errors
/// This function will return a:
/// - [Error::OwnerMismatch] if the bank link belongs to a different user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn insert_transaction(
    transaction: &NewTransaction,
    hash_dedupe: &str,
    connection: &Connection,
) -> Result<InsertOutcome, Error> {
    if let Some(bank_link_id) = transaction.bank_link_id {
        let owner: UserId = connection.query_row(
            "SELECT user_id FROM bank_link WHERE id = ?1",
            [bank_link_id],
            |row| row.get(0),
        )?;

        if owner != transaction.user_id {
            return Err(Error::OwnerMismatch);
        }
    }

    let now = OffsetDateTime::now_utc();
    let inserted_id: Option<TransactionId> = connection
        .prepare(
            "INSERT INTO \"transaction\" (user_id, bank_link_id, posted_at, value_date, amount, currency, \
             txn_type, balance_after, description_raw, merchant_name, account_ref, category, subcategory, \
             hash_dedupe, source_meta, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
             ON CONFLICT(hash_dedupe) DO NOTHING
             RETURNING id",
        )?
        .query_map(
            rusqlite::params![
                transaction.user_id,
                transaction.bank_link_id,
                transaction.posted_at,
                transaction.value_date,
                transaction.amount,
                transaction.currency,
                transaction.direction,
                transaction.balance_after,
                transaction.description_raw,
                transaction.merchant_name,
                transaction.account_ref,
                transaction.category,
                transaction.subcategory,
                hash_dedupe,
                transaction.source_meta.to_string(),
                now,
            ],
            |row| row.get(0),
        )?
        .next()
        .transpose()?;

    Ok(match inserted_id {
        Some(id) => InsertOutcome::Inserted(id),
        None => InsertOutcome::Duplicate,
    })
}

/// Retrieve a transaction by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a transaction,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE id = :id"))?
        .query_row(&[(":id", &id)], map_transaction_row)
        .map_err(Error::from)
}

/// Retrieve all transactions for `user_id`, most recently posted first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_transactions_for_user(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY posted_at DESC, id DESC"
        ))?
        .query_map([user_id], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Get the total number of transactions in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| {
            row.get(0)
        })
        .map_err(|error| error.into())
}

/// Set the category of a transaction owned by `user_id`, e.g. an explicit user override.
///
/// Passing `None` for `category` clears both category and subcategory.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the transaction does not exist or belongs to another user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_transaction_category(
    id: TransactionId,
    user_id: UserId,
    category: Option<&str>,
    subcategory: Option<&str>,
    connection: &Connection,
) -> Result<(), Error> {
    let subcategory = category.and(subcategory);
    let rows_affected = connection.execute(
        "UPDATE \"transaction\" SET category = ?1, subcategory = ?2, updated_at = ?3 \
         WHERE id = ?4 AND user_id = ?5",
        (
            category,
            subcategory,
            OffsetDateTime::now_utc(),
            id,
            user_id,
        ),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Map a database row to a [Transaction].
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    let source_meta: String = row.get(15)?;
    let source_meta = serde_json::from_str(&source_meta).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(15, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        bank_link_id: row.get(2)?,
        posted_at: row.get(3)?,
        value_date: row.get(4)?,
        amount: row.get(5)?,
        currency: row.get(6)?,
        direction: row.get(7)?,
        balance_after: row.get(8)?,
        description_raw: row.get(9)?,
        merchant_name: row.get(10)?,
        account_ref: row.get(11)?,
        category: row.get(12)?,
        subcategory: row.get(13)?,
        hash_dedupe: row.get(14)?,
        source_meta,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
