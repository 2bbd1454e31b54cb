use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::{
    Error,
    category::{
        CategorizationResult, CategoryOverride, CategoryOverrideForm, RecategorizeMode,
        matcher::{CategoryRules, Matcher},
    },
    database_id::{CategoryOverrideId, TransactionId, UserId},
};

pub fn create_category_override_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS category_override (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                matcher TEXT NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT,
                created_at TEXT NOT NULL
            );",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_category_override_user ON category_override(user_id, id)",
        (),
    )?;

    Ok(())
}

/// Create a category override for `user_id`.
///
/// An empty subcategory is stored as no subcategory.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidPattern] if the matcher is empty or not a valid regular expression,
/// - [Error::MalformedRequest] if the category is empty,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_category_override(
    user_id: UserId,
    form: &CategoryOverrideForm,
    connection: &Connection,
) -> Result<CategoryOverride, Error> {
    let matcher = form.matcher.trim();
    Matcher::parse(matcher)?;

    let category = form.category.trim();
    if category.is_empty() {
        return Err(Error::MalformedRequest(
            "category cannot be empty".to_owned(),
        ));
    }

    let subcategory = form
        .subcategory
        .as_deref()
        .map(str::trim)
        .filter(|subcategory| !subcategory.is_empty());

    connection
        .prepare(
            "INSERT INTO category_override (user_id, matcher, category, subcategory, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, user_id, matcher, category, subcategory, created_at",
        )?
        .query_row(
            (
                user_id,
                matcher,
                category,
                subcategory,
                OffsetDateTime::now_utc(),
            ),
            map_category_override_row,
        )
        .map_err(Error::from)
}

/// Retrieve the category overrides of `user_id` in insertion order.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_category_overrides(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<CategoryOverride>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, matcher, category, subcategory, created_at
             FROM category_override WHERE user_id = ?1 ORDER BY id ASC",
        )?
        .query_map([user_id], map_category_override_row)?
        .map(|maybe_override| maybe_override.map_err(Error::from))
        .collect()
}

/// Delete a category override owned by `user_id`.
///
/// Categories already assigned to transactions are left as they are.
///
/// # Errors
/// This function will return a [Error::NotFound] if the override does not exist or belongs to
/// another user, or an [Error::SqlError] if there is some other SQL error.
pub fn delete_category_override(
    id: CategoryOverrideId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "DELETE FROM category_override WHERE id = ?1 AND user_id = ?2",
        (id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Re-evaluate the category overrides of `user_id` against their stored transactions.
///
/// With [RecategorizeMode::All], transactions that no rule matches keep their current
/// category, so explicit user assignments survive unless a rule now claims them.
///
/// **Note**: If you want all-or-nothing semantics, pass in a transaction for `connection`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn recategorize_transactions(
    user_id: UserId,
    mode: RecategorizeMode,
    connection: &Connection,
) -> Result<CategorizationResult, Error> {
    let rules = CategoryRules::compile(&get_category_overrides(user_id, connection)?);
    if rules.is_empty() {
        return Ok(CategorizationResult::empty());
    }

    let query = match mode {
        RecategorizeMode::All => {
            "SELECT id, merchant_name, description_raw FROM \"transaction\" WHERE user_id = ?1"
        }
        RecategorizeMode::Uncategorized => {
            "SELECT id, merchant_name, description_raw FROM \"transaction\"
             WHERE user_id = ?1 AND category IS NULL"
        }
    };

    let candidates: Vec<(TransactionId, Option<String>, String)> = connection
        .prepare(query)?
        .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<_, _>>()?;

    let mut statement = connection.prepare(
        "UPDATE \"transaction\" SET category = ?1, subcategory = ?2, updated_at = ?3 WHERE id = ?4",
    )?;
    let now = OffsetDateTime::now_utc();
    let mut transactions_categorized = 0;

    for (id, merchant_name, description) in &candidates {
        if let Some((category, subcategory)) = rules.resolve(merchant_name.as_deref(), description)
        {
            statement.execute((category, subcategory, now, id))?;
            transactions_categorized += 1;
        }
    }

    Ok(CategorizationResult {
        transactions_processed: candidates.len(),
        transactions_categorized,
    })
}

fn map_category_override_row(row: &Row) -> Result<CategoryOverride, rusqlite::Error> {
    Ok(CategoryOverride {
        id: row.get(0)?,
        user_id: row.get(1)?,
        matcher: row.get(2)?,
        category: row.get(3)?,
        subcategory: row.get(4)?,
        created_at: row.get(5)?,
    })
}
