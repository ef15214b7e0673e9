// ABOUTME: SQLite implementation of SyncStore on rusqlite
// ABOUTME: Catalog introspection through sqlite_master and the pragma table functions

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};

use super::{Dialect, RowRecord, SqlValue, SyncStore};

/// How long a statement waits on a database locked by the POS application.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A SQLite database file used as one side of the sync.
pub struct SqliteStore {
    conn: Connection,
    location: String,
}

impl SqliteStore {
    /// Open a SQLite database from `sqlite://path`, `sqlite:path`, `sqlite::memory:`
    /// or a bare file path.
    pub fn open(url: &str) -> Result<Self> {
        let location = sqlite_location(url);
        let conn = if location == ":memory:" {
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?
        } else {
            let path = PathBuf::from(&location);
            Connection::open(&path)
                .with_context(|| format!("Failed to open SQLite database at {:?}", path))?
        };
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set SQLite busy timeout")?;

        tracing::debug!("Opened SQLite database {}", location);
        Ok(Self { conn, location })
    }

    /// Borrow the underlying connection, e.g. for test fixtures.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_strings(&self, sql: &str, arg: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare catalog query for '{}'", arg))?;
        let names = stmt
            .query_map([arg], |row| row.get::<_, Option<String>>(0))
            .with_context(|| format!("Failed to run catalog query for '{}'", arg))?
            .collect::<Result<Vec<Option<String>>, _>>()
            .context("Failed to collect catalog rows")?;
        Ok(names.into_iter().flatten().collect())
    }
}

/// The file path (or `:memory:`) a SQLite connection string refers to.
pub(crate) fn sqlite_location(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed == "sqlite::memory:" || trimmed == ":memory:" {
        return ":memory:".to_string();
    }
    trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed)
        .to_string()
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            // SQLite integers are signed 64-bit; larger values keep their digits as text
            SqlValue::UInt(u) => match i64::try_from(*u) {
                Ok(i) => ToSqlOutput::Owned(Value::Integer(i)),
                Err(_) => ToSqlOutput::Owned(Value::Text(u.to_string())),
            },
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_sqlite(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Int(i),
        Value::Real(f) => SqlValue::Float(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Bytes(b),
    }
}

impl SyncStore for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }

    /// The tracking triggers and backfill stamp `strftime(.., 'now')`, which is UTC.
    fn utc_offset_seconds(&self) -> i64 {
        0
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("SQLite database is not readable")?;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type='table' \
                 AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .context("Failed to prepare statement to list tables")?;

        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query table list")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to collect table names")?;

        Ok(tables)
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to check if table '{}' exists", table))?;
        Ok(count > 0)
    }

    async fn table_definition(&mut self, table: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name = ?1",
                [table],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("Failed to read definition of table '{}'", table))?
            .with_context(|| format!("Table '{}' does not exist", table))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
            table,
        )
    }

    async fn indexed_columns(&mut self, table: &str) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT DISTINCT ii.name \
             FROM pragma_index_list(?1) AS il, pragma_index_info(il.name) AS ii \
             WHERE ii.seqno = 0",
            table,
        )
    }

    async fn key_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let pk = self.query_strings(
            "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk",
            table,
        )?;
        if !pk.is_empty() {
            return Ok(pk);
        }

        let unique_index = self
            .query_strings(
                "SELECT name FROM pragma_index_list(?1) \
                 WHERE \"unique\" = 1 AND partial = 0 ORDER BY name",
                table,
            )?
            .into_iter()
            .next();

        match unique_index {
            Some(index) => self.query_strings(
                "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                &index,
            ),
            None => Ok(Vec::new()),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter()))
            .context("SQLite statement failed")?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare SQLite query")?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .context("SQLite query failed")?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().context("Failed to read SQLite row")? {
            let mut record = RowRecord::new();
            for (idx, name) in columns.iter().enumerate() {
                let value: Value = row.get(idx)?;
                record.push(name.clone(), from_sqlite(value));
            }
            records.push(record);
        }

        Ok(records)
    }
}
