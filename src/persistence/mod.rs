pub mod migrations;
pub mod models;

mod accounts;
mod chats;
mod files;
mod orders;
mod reviews;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use directories::BaseDirs;
use duckdb::types::Type;
use duckdb::{params, params_from_iter, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::MarketError;
use crate::soft_delete::{BuiltQuery, Schema, Select, SoftDelete, DELETED_AT};

/// Timestamp columns are read back as text and parsed on the Rust side.
const TIMESTAMP_COLUMNS: [&str; 3] = ["created_at", "updated_at", DELETED_AT];

#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<Schema>,
}

impl Persistence {
    /// Create or open the database at the provided path and run migrations.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = expand_tilde(db_path.as_ref())?;
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).context("creating DB directory")?;
        }
        let conn = Connection::open(&db_path).context("opening DuckDB")?;
        Self::from_connection(conn)
    }

    /// Throwaway database that lives as long as the returned handle.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory DuckDB")?;
        Self::from_connection(conn)
    }

    /// Creates or opens the default database at ~/.gigboard/gigboard.duckdb
    pub fn new_default() -> Result<Self> {
        let base = BaseDirs::new().context("base directories not available")?;
        let path = base.home_dir().join(".gigboard").join("gigboard.duckdb");
        Self::new(path)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn).context("running migrations")?;
        let schema = models::model_registry()
            .configure()
            .context("configuring model relationships")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: Arc::new(schema),
        })
    }

    /// Checkpoint the database to ensure all WAL data is written to the main database file.
    /// Call this before shutdown to ensure clean database state.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("CHECKPOINT;")
            .context("checkpointing database")
    }

    /// Exclusive access to the database connection.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            // A panic while holding the lock leaves DuckDB itself consistent.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Start a filtered read against `table`.
    pub fn select(&self, table: &str, alias: &str) -> Select<'_> {
        Select::from(&self.schema, table, alias)
    }

    pub fn fetch_all<T, F>(&self, select: Select<'_>, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        let query = select.build()?;
        let conn = self.conn();
        query_rows(&conn, &query, map)
    }

    pub fn fetch_one<T, F>(&self, select: Select<'_>, map: F) -> Result<Option<T>>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        Ok(self.fetch_all(select.limit(1), map)?.into_iter().next())
    }

    /// Return the id matched by `existing`, or run `insert` when nothing
    /// matches. Both run under one lock and transaction. The flag is true if
    /// a row was inserted.
    pub(crate) fn find_or_insert<F>(&self, existing: Select<'_>, insert: F) -> Result<(i64, bool)>
    where
        F: FnOnce(&Connection) -> duckdb::Result<i64>,
    {
        let existing = existing.limit(1).build()?;
        let conn = self.conn();
        in_transaction(&conn, |tx| {
            if let Some(id) = query_rows(tx, &existing, |row| row.get::<_, i64>(0))?.into_iter().next() {
                return Ok((id, false));
            }
            Ok((insert(tx)?, true))
        })
    }

    /// Like [`Self::find_or_insert`], but a match is a conflict.
    pub(crate) fn insert_unique<F>(&self, existing: Select<'_>, conflict: MarketError, insert: F) -> Result<i64>
    where
        F: FnOnce(&Connection) -> duckdb::Result<i64>,
    {
        match self.find_or_insert(existing, insert)? {
            (id, true) => Ok(id),
            (_, false) => Err(conflict.into()),
        }
    }

    // ---------- Soft delete ----------

    /// Mark a live row deleted. Returns false if the row is missing or already deleted.
    pub fn soft_delete<T: SoftDelete>(&self, id: i64, at: Option<DateTime<Utc>>) -> Result<bool> {
        let at = at.unwrap_or_else(Utc::now);
        let conn = self.conn();
        let sql = format!(
            "UPDATE {} SET deleted_at = CAST(? AS TIMESTAMP), updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND deleted_at IS NULL",
            T::TABLE
        );
        let changed = conn.execute(&sql, params![format_timestamp(&at), id])?;
        if changed > 0 {
            tracing::debug!("Soft-deleted {} #{}", T::TABLE, id);
        }
        Ok(changed > 0)
    }

    /// Clear the deletion mark. Returns false if the row is missing or live.
    pub fn restore<T: SoftDelete>(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let sql = format!(
            "UPDATE {} SET deleted_at = NULL, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND deleted_at IS NOT NULL",
            T::TABLE
        );
        let changed = conn.execute(&sql, params![id])?;
        if changed > 0 {
            tracing::debug!("Restored {} #{}", T::TABLE, id);
        }
        Ok(changed > 0)
    }

    /// Write the in-memory deletion state of `record` back to its row.
    pub fn save_deletion_state<T: SoftDelete>(&self, record: &T) -> Result<bool> {
        let conn = self.conn();
        let sql = format!(
            "UPDATE {} SET deleted_at = CAST(? AS TIMESTAMP), updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            T::TABLE
        );
        let at = record.deleted_at().map(|at| format_timestamp(&at));
        let changed = conn.execute(&sql, params![at, record.id()])?;
        Ok(changed > 0)
    }
}

/// Run `query` on an already locked connection.
pub(crate) fn query_rows<T, F>(conn: &Connection, query: &BuiltQuery, mut map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> duckdb::Result<T>,
{
    let mut stmt = conn
        .prepare(&query.sql)
        .with_context(|| format!("preparing query: {}", query.sql))?;
    let mut rows = stmt.query(params_from_iter(query.params.iter().cloned()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map(row)?);
    }
    Ok(out)
}

/// Run `f` inside a transaction, rolling back if it fails.
pub(crate) fn in_transaction<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    conn.execute_batch("BEGIN TRANSACTION;")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT;")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK;") {
                tracing::error!("Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}

/// Qualify `columns` with `alias`, casting timestamps to text.
pub(crate) fn qualified(alias: &str, columns: &[&str]) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            if TIMESTAMP_COLUMNS.contains(column) {
                format!("CAST({}.{} AS TEXT)", alias, column)
            } else {
                format!("{}.{}", alias, column)
            }
        })
        .collect()
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

pub(crate) fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map(|naive| naive.and_utc())
}

/// Read the text-cast timestamp in column `idx`.
pub(crate) fn timestamp_at(row: &Row<'_>, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text)
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        parse_timestamp(&t)
            .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str == "~" {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().to_path_buf())
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;

    #[test]
    fn expands_home_directory_prefix() {
        let base = BaseDirs::new().expect("home directory available");
        let expected = base.home_dir().join("demo.db");
        let result = expand_tilde(Path::new("~/demo.db")).expect("path expansion succeeds");
        assert_eq!(result, expected);
    }

    #[test]
    fn leaves_regular_paths_unchanged() {
        let input = Path::new("relative/path.db");
        let result = expand_tilde(input).expect("path expansion succeeds");
        assert_eq!(result, input);
    }

    #[test]
    fn qualifies_and_casts_timestamp_columns() {
        assert_eq!(
            qualified("o", &["id", "name", "created_at", "deleted_at"]),
            vec![
                "o.id",
                "o.name",
                "CAST(o.created_at AS TEXT)",
                "CAST(o.deleted_at AS TEXT)"
            ]
        );
    }

    #[test]
    fn parses_duckdb_timestamp_text() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-09 08:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp(&format_timestamp(&expected)).unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-09T08:30:00Z").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn unparseable_timestamp_fails_the_row() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.query_row("SELECT 'not a time', NULL::TEXT", [], |row| {
            Ok((timestamp_at(row, 0), optional_timestamp_at(row, 1)?))
        });
        let (created, deleted) = result.unwrap();
        assert!(matches!(
            created,
            Err(duckdb::Error::FromSqlConversionFailure(0, Type::Text, _))
        ));
        assert_eq!(deleted, None);

        let err = conn
            .query_row("SELECT 'garbage'", [], |row| timestamp_at(row, 0))
            .unwrap_err();
        assert!(matches!(err, duckdb::Error::FromSqlConversionFailure(0, _, _)));
    }
}
