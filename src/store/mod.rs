// ABOUTME: Database handle abstraction the sync engine runs against
// ABOUTME: Tagged row values, dialect differences, and URL-based backend selection

pub mod mysql;
pub mod sqlite;

use std::fmt;

use anyhow::{Context, Result};

pub use mysql::MySqlStore;
pub use sqlite::SqliteStore;

/// A single column value as fetched from a source row.
///
/// Carries enough type information to bind the value back as a parameter on
/// either backend without going through string escaping.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render scalar values as text; `None` for NULL and non-UTF-8 bytes.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::UInt(u) => Some(u.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => String::from_utf8(b.clone()).ok(),
        }
    }

    /// Interpret the value as an integer, parsing text when needed.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::UInt(u) => i64::try_from(*u).ok(),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One fetched row: column names in select order, each with its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    fields: Vec<(String, SqlValue)>,
}

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.fields.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Value at a position in select order.
    pub fn at(&self, index: usize) -> Option<&SqlValue> {
        self.fields.get(index).map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// SQL flavour of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    /// Quote an identifier for this dialect.
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::MySql => crate::utils::quote_mysql_ident(identifier),
            Dialect::Sqlite => crate::utils::quote_ident(identifier),
        }
    }

    /// Upper bound on bound parameters in a single statement.
    pub fn max_bind_params(&self) -> usize {
        match self {
            Dialect::MySql => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }

    /// Upsert form every server of this dialect understands.
    pub fn default_upsert_syntax(&self) -> UpsertSyntax {
        match self {
            Dialect::MySql => UpsertSyntax::DuplicateKeyValues,
            Dialect::Sqlite => UpsertSyntax::OnConflict,
        }
    }
}

/// How a store spells "insert, or update the row with the same key".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertSyntax {
    /// `ON CONFLICT (key) DO UPDATE SET c = excluded.c` (SQLite).
    OnConflict,
    /// `ON DUPLICATE KEY UPDATE c = VALUES(c)` (MariaDB, MySQL before 8.0.19).
    DuplicateKeyValues,
    /// `AS incoming ON DUPLICATE KEY UPDATE c = incoming.c` (MySQL 8.0.19+,
    /// where `VALUES()` is deprecated).
    DuplicateKeyRowAlias,
}

impl UpsertSyntax {
    pub fn dialect(&self) -> Dialect {
        match self {
            UpsertSyntax::OnConflict => Dialect::Sqlite,
            UpsertSyntax::DuplicateKeyValues | UpsertSyntax::DuplicateKeyRowAlias => Dialect::MySql,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// The operations the engine needs from a database connection.
///
/// Every statement the engine builds goes through `execute`/`query` with bound
/// parameters; the introspection methods hide the catalog differences between
/// backends. Table and column names passed in have already been validated.
#[allow(async_fn_in_trait)]
pub trait SyncStore {
    fn dialect(&self) -> Dialect;

    /// Password-free description of the connection, for logs.
    fn describe(&self) -> String;

    /// Offset from UTC, in seconds, of the clock that stamps `updated_at` here.
    fn utc_offset_seconds(&self) -> i64;

    fn upsert_syntax(&self) -> UpsertSyntax {
        self.dialect().default_upsert_syntax()
    }

    /// Round-trip to the server to prove the connection is usable.
    async fn ping(&mut self) -> Result<()>;

    /// User tables, sorted by name.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// The `CREATE TABLE` statement that recreates `table` on a store of the same dialect.
    async fn table_definition(&mut self, table: &str) -> Result<String>;

    /// Column names in ordinal order.
    async fn columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Columns that lead at least one index.
    async fn indexed_columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Primary key columns, or the columns of the first unique index if there is no primary key.
    async fn key_columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Run a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a query and collect its rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>>;
}

/// Backend chosen at runtime from a connection URL.
pub enum AnyStore {
    MySql(MySqlStore),
    Sqlite(SqliteStore),
}

impl AnyStore {
    /// Close the connection, waiting for MySQL to acknowledge.
    pub async fn close(self) -> Result<()> {
        match self {
            AnyStore::MySql(s) => s.disconnect().await,
            AnyStore::Sqlite(_) => Ok(()),
        }
    }
}

impl SyncStore for AnyStore {
    fn dialect(&self) -> Dialect {
        match self {
            AnyStore::MySql(s) => s.dialect(),
            AnyStore::Sqlite(s) => s.dialect(),
        }
    }

    fn describe(&self) -> String {
        match self {
            AnyStore::MySql(s) => s.describe(),
            AnyStore::Sqlite(s) => s.describe(),
        }
    }

    fn utc_offset_seconds(&self) -> i64 {
        match self {
            AnyStore::MySql(s) => s.utc_offset_seconds(),
            AnyStore::Sqlite(s) => s.utc_offset_seconds(),
        }
    }

    fn upsert_syntax(&self) -> UpsertSyntax {
        match self {
            AnyStore::MySql(s) => s.upsert_syntax(),
            AnyStore::Sqlite(s) => s.upsert_syntax(),
        }
    }

    async fn ping(&mut self) -> Result<()> {
        match self {
            AnyStore::MySql(s) => s.ping().await,
            AnyStore::Sqlite(s) => s.ping().await,
        }
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        match self {
            AnyStore::MySql(s) => s.list_tables().await,
            AnyStore::Sqlite(s) => s.list_tables().await,
        }
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        match self {
            AnyStore::MySql(s) => s.table_exists(table).await,
            AnyStore::Sqlite(s) => s.table_exists(table).await,
        }
    }

    async fn table_definition(&mut self, table: &str) -> Result<String> {
        match self {
            AnyStore::MySql(s) => s.table_definition(table).await,
            AnyStore::Sqlite(s) => s.table_definition(table).await,
        }
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        match self {
            AnyStore::MySql(s) => s.columns(table).await,
            AnyStore::Sqlite(s) => s.columns(table).await,
        }
    }

    async fn indexed_columns(&mut self, table: &str) -> Result<Vec<String>> {
        match self {
            AnyStore::MySql(s) => s.indexed_columns(table).await,
            AnyStore::Sqlite(s) => s.indexed_columns(table).await,
        }
    }

    async fn key_columns(&mut self, table: &str) -> Result<Vec<String>> {
        match self {
            AnyStore::MySql(s) => s.key_columns(table).await,
            AnyStore::Sqlite(s) => s.key_columns(table).await,
        }
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        match self {
            AnyStore::MySql(s) => s.execute(sql, params).await,
            AnyStore::Sqlite(s) => s.execute(sql, params).await,
        }
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>> {
        match self {
            AnyStore::MySql(s) => s.query(sql, params).await,
            AnyStore::Sqlite(s) => s.query(sql, params).await,
        }
    }
}

/// Detect which backend a connection string refers to.
///
/// # Examples
///
/// ```
/// # use edge_cloud_sync::store::{detect_dialect, Dialect};
/// assert_eq!(detect_dialect("mysql://pos@localhost/store").unwrap(), Dialect::MySql);
/// assert_eq!(detect_dialect("sqlite:///var/lib/pos/edge.db").unwrap(), Dialect::Sqlite);
/// assert_eq!(detect_dialect("edge.sqlite3").unwrap(), Dialect::Sqlite);
/// assert!(detect_dialect("postgresql://localhost/db").is_err());
/// ```
pub fn detect_dialect(url: &str) -> Result<Dialect> {
    let lower = url.trim().to_lowercase();
    if lower.starts_with("mysql://") {
        Ok(Dialect::MySql)
    } else if lower.starts_with("sqlite:")
        || lower.ends_with(".db")
        || lower.ends_with(".sqlite")
        || lower.ends_with(".sqlite3")
    {
        Ok(Dialect::Sqlite)
    } else {
        anyhow::bail!(
            "Unsupported connection string '{}': expected mysql://... or a SQLite path \
             (sqlite://path, *.db, *.sqlite, *.sqlite3)",
            crate::utils::strip_password_from_url(url)
        )
    }
}

/// Open a store for the given connection string.
pub async fn connect(url: &str) -> Result<AnyStore> {
    match detect_dialect(url)? {
        Dialect::MySql => Ok(AnyStore::MySql(
            MySqlStore::connect(url)
                .await
                .context("Failed to connect to MySQL")?,
        )),
        Dialect::Sqlite => Ok(AnyStore::Sqlite(
            SqliteStore::open(url).context("Failed to open SQLite database")?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_record_lookup_preserves_order() {
        let mut row = RowRecord::new();
        row.push("id", SqlValue::Int(7));
        row.push("name", SqlValue::Text("espresso".to_string()));
        row.push("note", SqlValue::Null);

        assert_eq!(row.len(), 3);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name", "note"]);
        assert_eq!(row.get("name"), Some(&SqlValue::Text("espresso".to_string())));
        assert_eq!(row.at(0), Some(&SqlValue::Int(7)));
        assert!(row.get("note").unwrap().is_null());
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_sql_value_text_and_int_views() {
        assert_eq!(SqlValue::Int(42).to_text().as_deref(), Some("42"));
        assert_eq!(SqlValue::Text(" 17 ".into()).to_i64(), Some(17));
        assert_eq!(SqlValue::Bytes(b"abc".to_vec()).to_text().as_deref(), Some("abc"));
        assert_eq!(SqlValue::Bytes(vec![0xff, 0xfe]).to_text(), None);
        assert_eq!(SqlValue::Null.to_text(), None);
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
    }

    #[test]
    fn test_dialect_quoting() {
        assert_eq!(Dialect::MySql.quote("orders"), "`orders`");
        assert_eq!(Dialect::Sqlite.quote("orders"), "\"orders\"");
    }

    #[test]
    fn test_detect_dialect_rejects_unknown_schemes() {
        assert!(detect_dialect("mongodb://localhost/db").is_err());
        assert_eq!(detect_dialect("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert_eq!(detect_dialect("MYSQL://h/db").unwrap(), Dialect::MySql);
    }
}
