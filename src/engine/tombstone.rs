// ABOUTME: TombstonePropagator - replays deletes recorded in one store's deleted_rows on the other
// ABOUTME: A marker is cleared only after its delete succeeded, so failures retry next run

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};

use super::context::{Direction, RunContext};
use crate::error::{one_line, SyncError};
use crate::store::{Dialect, SqlValue, SyncStore};
use crate::utils::validate_identifier;

/// Table application code writes delete markers into.
pub const TOMBSTONE_TABLE: &str = "deleted_rows";

/// A pending delete: remove the row of `table_name` whose key equals `primary_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub id: i64,
    pub table_name: String,
    pub primary_key: SqlValue,
}

pub struct TombstonePropagator<'a> {
    excluded: &'a BTreeSet<String>,
}

impl<'a> TombstonePropagator<'a> {
    /// Tables in `excluded` are never deleted from.
    pub fn new(excluded: &'a BTreeSet<String>) -> Self {
        Self { excluded }
    }

    /// Create `deleted_rows` if the store does not have one yet.
    pub async fn ensure_table<S: SyncStore>(store: &mut S) -> Result<()> {
        let ddl = match store.dialect() {
            Dialect::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 `id` INT AUTO_INCREMENT PRIMARY KEY, \
                 `table_name` VARCHAR(64) NOT NULL, \
                 `primary_key` VARCHAR(255) NOT NULL, \
                 `origin` VARCHAR(16) NULL, \
                 `created_at` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP)",
                Dialect::MySql.quote(TOMBSTONE_TABLE)
            ),
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
                 \"table_name\" TEXT NOT NULL, \
                 \"primary_key\" TEXT NOT NULL, \
                 \"origin\" TEXT, \
                 \"created_at\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP)",
                Dialect::Sqlite.quote(TOMBSTONE_TABLE)
            ),
        };
        store
            .execute(&ddl, &[])
            .await
            .with_context(|| format!("Failed to create {} on {}", TOMBSTONE_TABLE, store.describe()))?;
        Ok(())
    }

    /// Markers waiting in `origin`, oldest first.
    pub async fn pending<S: SyncStore>(origin: &mut S) -> Result<Vec<Tombstone>> {
        let q = |c: &str| origin.dialect().quote(c);
        let sql = format!(
            "SELECT {}, {}, {} FROM {} ORDER BY {}",
            q("id"),
            q("table_name"),
            q("primary_key"),
            q(TOMBSTONE_TABLE),
            q("id")
        );
        let rows = origin
            .query(&sql, &[])
            .await
            .with_context(|| format!("Failed to read {}", TOMBSTONE_TABLE))?;

        let mut tombstones = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row
                .at(0)
                .and_then(SqlValue::to_i64)
                .with_context(|| format!("{} row without a numeric id", TOMBSTONE_TABLE))?;
            tombstones.push(Tombstone {
                id,
                table_name: row.at(1).and_then(SqlValue::to_text).unwrap_or_default(),
                primary_key: row.at(2).cloned().unwrap_or(SqlValue::Null),
            });
        }
        Ok(tombstones)
    }

    /// Apply every marker recorded in `origin` to `dest`.
    ///
    /// Returns the number of markers consumed. Deleted row counts go to
    /// `ctx.rows_deleted`; each marker that could not be applied is recorded
    /// and left in place.
    pub async fn propagate<S: SyncStore, T: SyncStore>(
        &self,
        origin: &mut S,
        dest: &mut T,
        direction: Direction,
        ctx: &mut RunContext,
    ) -> u64 {
        let tombstones = match Self::pending(origin).await {
            Ok(tombstones) => tombstones,
            Err(e) => {
                ctx.record(SyncError::Fetch {
                    table: TOMBSTONE_TABLE.to_string(),
                    direction,
                    message: one_line(&e),
                });
                return 0;
            }
        };
        if tombstones.is_empty() {
            return 0;
        }
        tracing::info!("{} pending delete(s) ({})", tombstones.len(), direction);

        let mut keys: HashMap<String, Result<String, String>> = HashMap::new();
        let mut consumed = 0u64;

        for tombstone in tombstones {
            if !keys.contains_key(&tombstone.table_name) {
                let resolved = self
                    .delete_key(dest, &tombstone.table_name)
                    .await
                    .map_err(|e| one_line(&e));
                keys.insert(tombstone.table_name.clone(), resolved);
            }
            let key_column = match keys.get(&tombstone.table_name) {
                Some(Ok(column)) => column.clone(),
                Some(Err(message)) => {
                    ctx.record(SyncError::Write {
                        table: tombstone.table_name.clone(),
                        direction,
                        message: format!("delete marker {}: {}", tombstone.id, message),
                    });
                    continue;
                }
                None => continue,
            };

            let delete_sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                dest.dialect().quote(&tombstone.table_name),
                dest.dialect().quote(&key_column)
            );
            let deleted = match dest.execute(&delete_sql, &[tombstone.primary_key.clone()]).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    ctx.record(SyncError::Write {
                        table: tombstone.table_name.clone(),
                        direction,
                        message: format!("delete marker {}: {}", tombstone.id, one_line(&e)),
                    });
                    continue;
                }
            };
            if deleted == 0 {
                tracing::debug!(
                    "{} row {:?} already absent on {}",
                    tombstone.table_name,
                    tombstone.primary_key,
                    direction.target_side()
                );
            }
            ctx.rows_deleted += deleted;

            let clear_sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                origin.dialect().quote(TOMBSTONE_TABLE),
                origin.dialect().quote("id")
            );
            match origin.execute(&clear_sql, &[SqlValue::Int(tombstone.id)]).await {
                Ok(_) => consumed += 1,
                Err(e) => ctx.record(SyncError::Write {
                    table: TOMBSTONE_TABLE.to_string(),
                    direction,
                    message: format!("clearing marker {}: {}", tombstone.id, one_line(&e)),
                }),
            }
        }

        consumed
    }

    /// The single key column a marker's value refers to.
    async fn delete_key<T: SyncStore>(&self, dest: &mut T, table: &str) -> Result<String> {
        validate_identifier(table)?;
        if self.excluded.contains(table) {
            bail!("table {} is excluded from sync", table);
        }
        if !dest.table_exists(table).await? {
            bail!("table {} does not exist", table);
        }

        let mut key = dest.key_columns(table).await?;
        match key.len() {
            1 => Ok(key.remove(0)),
            0 => bail!("table {} has no primary key", table),
            n => bail!(
                "table {} has a {}-column key; a single value cannot address a row",
                table,
                n
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn store(ddl: &str) -> SqliteStore {
        let store = SqliteStore::open("sqlite::memory:").unwrap();
        store.connection().execute_batch(ddl).unwrap();
        store
    }

    fn count(store: &SqliteStore, sql: &str) -> i64 {
        store.connection().query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[tokio::test]
    async fn test_propagate_deletes_and_clears_markers() {
        let mut origin = store("");
        TombstonePropagator::ensure_table(&mut origin).await.unwrap();
        origin
            .connection()
            .execute_batch(
                "INSERT INTO deleted_rows (table_name, primary_key) VALUES ('products', '2');
                 INSERT INTO deleted_rows (table_name, primary_key) VALUES ('products', '99');",
            )
            .unwrap();
        let mut dest = store(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO products VALUES (1, 'a'), (2, 'b');",
        );

        let excluded = BTreeSet::new();
        let mut ctx = RunContext::new("t");
        let consumed = TombstonePropagator::new(&excluded)
            .propagate(&mut origin, &mut dest, Direction::CloudToEdge, &mut ctx)
            .await;

        // Marker 99 matches nothing but still counts as applied
        assert_eq!(consumed, 2);
        assert!(!ctx.has_errors());
        assert_eq!(ctx.rows_deleted, 1);
        assert_eq!(count(&dest, "SELECT COUNT(*) FROM products"), 1);
        assert_eq!(count(&origin, "SELECT COUNT(*) FROM deleted_rows"), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_markers_are_kept() {
        let mut origin = store("");
        TombstonePropagator::ensure_table(&mut origin).await.unwrap();
        origin
            .connection()
            .execute_batch(
                "INSERT INTO deleted_rows (table_name, primary_key) VALUES ('missing', '1');
                 INSERT INTO deleted_rows (table_name, primary_key) VALUES ('lines', '1');
                 INSERT INTO deleted_rows (table_name, primary_key) VALUES ('audit_logs', '1');
                 INSERT INTO deleted_rows (table_name, primary_key) VALUES ('x; DROP TABLE y', '1');",
            )
            .unwrap();
        let mut dest = store(
            "CREATE TABLE lines (order_id INTEGER, line INTEGER, PRIMARY KEY (order_id, line));
             CREATE TABLE audit_logs (id INTEGER PRIMARY KEY);",
        );

        let excluded: BTreeSet<String> = ["audit_logs".to_string()].into_iter().collect();
        let mut ctx = RunContext::new("t");
        let consumed = TombstonePropagator::new(&excluded)
            .propagate(&mut origin, &mut dest, Direction::EdgeToCloud, &mut ctx)
            .await;

        assert_eq!(consumed, 0);
        assert_eq!(ctx.errors().len(), 4);
        assert!(ctx.errors()[1].to_string().contains("2-column key"));
        assert_eq!(count(&origin, "SELECT COUNT(*) FROM deleted_rows"), 4);
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let mut s = store("");
        TombstonePropagator::ensure_table(&mut s).await.unwrap();
        TombstonePropagator::ensure_table(&mut s).await.unwrap();
        assert!(TombstonePropagator::pending(&mut s).await.unwrap().is_empty());
    }
}
