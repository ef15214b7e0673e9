// ABOUTME: SchemaReconciler - makes a table syncable on both sides
// ABOUTME: Creates missing tables from the source DDL, adds and indexes the tracking columns

use anyhow::{bail, Context, Result};

use super::context::RunContext;
use crate::error::{one_line, SyncError};
use crate::store::{Dialect, SqlValue, SyncStore};

/// Column holding the row's creation time.
pub const CREATED_AT: &str = "created_at";

/// Column holding the row's last modification time; the sync watermark column.
pub const UPDATED_AT: &str = "updated_at";

/// Millisecond-precision "now" in the text format SQLite compares lexically.
const SQLITE_NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// Introspected shape of one table on one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub key_columns: Vec<String>,
    pub has_tracking_columns: bool,
}

impl TableDescriptor {
    pub async fn introspect<S: SyncStore>(store: &mut S, table: &str) -> Result<Self> {
        let columns = store
            .columns(table)
            .await
            .with_context(|| format!("Failed to read columns of {}", table))?;
        if columns.is_empty() {
            bail!("Table {} has no columns (does it exist?)", table);
        }
        let key_columns = store
            .key_columns(table)
            .await
            .with_context(|| format!("Failed to read key of {}", table))?;
        let has_tracking_columns = has_column(&columns, CREATED_AT) && has_column(&columns, UPDATED_AT);

        Ok(Self {
            name: table.to_string(),
            columns,
            key_columns,
            has_tracking_columns,
        })
    }

    pub fn has_column(&self, column: &str) -> bool {
        has_column(&self.columns, column)
    }
}

fn has_column(columns: &[String], column: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(column))
}

/// What one tracking-column pass changed on one side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingReport {
    pub added_columns: Vec<&'static str>,
    pub added_indexes: Vec<&'static str>,
    pub added_triggers: usize,
    pub backfilled_rows: u64,
}

impl TrackingReport {
    pub fn is_noop(&self) -> bool {
        self.added_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.added_triggers == 0
            && self.backfilled_rows == 0
    }
}

/// Ensures tables exist on both sides and carry `created_at`/`updated_at`.
pub struct SchemaReconciler;

impl SchemaReconciler {
    /// Reconcile `table` between `source` (where it is known to exist) and `target`.
    ///
    /// Failures are recorded in `ctx`. Returns `false` when the table could not
    /// be created on the target, in which case there is nothing to sync into.
    pub async fn reconcile<S: SyncStore, T: SyncStore>(
        table: &str,
        source: &mut S,
        source_side: &'static str,
        target: &mut T,
        target_side: &'static str,
        ctx: &mut RunContext,
    ) -> bool {
        match Self::ensure_table_exists(table, source, target).await {
            Ok(true) => tracing::info!("Created {} on {} from {} definition", table, target_side, source_side),
            Ok(false) => {}
            Err(e) => {
                ctx.record(SyncError::Schema {
                    table: table.to_string(),
                    side: target_side,
                    message: one_line(&e),
                });
                return false;
            }
        }

        for (store_side, result) in [
            (source_side, Self::ensure_tracking_columns(source, table).await),
            (target_side, Self::ensure_tracking_columns(target, table).await),
        ] {
            match result {
                Ok(report) if !report.is_noop() => tracing::info!(
                    "Prepared {} on {}: columns {:?}, indexes {:?}, {} trigger(s), {} row(s) backfilled",
                    table,
                    store_side,
                    report.added_columns,
                    report.added_indexes,
                    report.added_triggers,
                    report.backfilled_rows
                ),
                Ok(_) => {}
                Err(e) => ctx.record(SyncError::Schema {
                    table: table.to_string(),
                    side: store_side,
                    message: one_line(&e),
                }),
            }
        }

        true
    }

    /// Create `table` on `target` from `source`'s definition if it is missing.
    ///
    /// Returns whether the table was created.
    pub async fn ensure_table_exists<S: SyncStore, T: SyncStore>(
        table: &str,
        source: &mut S,
        target: &mut T,
    ) -> Result<bool> {
        if target.table_exists(table).await? {
            return Ok(false);
        }
        Self::create_from_source(table, source, target).await?;
        Ok(true)
    }

    /// Drop `table` on `target` and rebuild it from `source`'s definition.
    pub async fn recreate<S: SyncStore, T: SyncStore>(
        table: &str,
        source: &mut S,
        target: &mut T,
    ) -> Result<()> {
        // Read the definition first so a failure leaves the target untouched
        let ddl = Self::source_definition(table, source, target.dialect()).await?;
        let drop_sql = format!("DROP TABLE IF EXISTS {}", target.dialect().quote(table));
        target
            .execute(&drop_sql, &[])
            .await
            .with_context(|| format!("Failed to drop {}", table))?;
        target
            .execute(&ddl, &[])
            .await
            .with_context(|| format!("Failed to create {}", table))?;
        Ok(())
    }

    async fn create_from_source<S: SyncStore, T: SyncStore>(
        table: &str,
        source: &mut S,
        target: &mut T,
    ) -> Result<()> {
        let ddl = Self::source_definition(table, source, target.dialect()).await?;
        target
            .execute(&ddl, &[])
            .await
            .with_context(|| format!("Failed to create {}", table))?;
        Ok(())
    }

    async fn source_definition<S: SyncStore>(
        table: &str,
        source: &mut S,
        target_dialect: Dialect,
    ) -> Result<String> {
        if source.dialect() != target_dialect {
            bail!(
                "Table {} cannot be created on the {} side from a {} definition; \
                 create it manually",
                table,
                target_dialect,
                source.dialect()
            );
        }
        source
            .table_definition(table)
            .await
            .with_context(|| format!("Failed to read definition of {}", table))
    }

    /// Add, index and backfill the tracking columns of `table` on one store.
    ///
    /// Idempotent: a table that already has both columns indexed (and, on
    /// SQLite, the touch triggers) and no NULL `created_at` is left untouched.
    pub async fn ensure_tracking_columns<S: SyncStore>(
        store: &mut S,
        table: &str,
    ) -> Result<TrackingReport> {
        match store.dialect() {
            Dialect::MySql => ensure_mysql_tracking(store, table).await,
            Dialect::Sqlite => ensure_sqlite_tracking(store, table).await,
        }
    }
}

async fn ensure_mysql_tracking<S: SyncStore>(store: &mut S, table: &str) -> Result<TrackingReport> {
    let q = |ident: &str| Dialect::MySql.quote(ident);
    let mut report = TrackingReport::default();

    let columns = store.columns(table).await?;
    let mut alters = Vec::new();
    if !has_column(&columns, CREATED_AT) {
        alters.push(format!(
            "ADD {} DATETIME(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)",
            q(CREATED_AT)
        ));
        report.added_columns.push(CREATED_AT);
    }
    if !has_column(&columns, UPDATED_AT) {
        alters.push(format!(
            "ADD {} DATETIME(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3)",
            q(UPDATED_AT)
        ));
        report.added_columns.push(UPDATED_AT);
    }
    if !alters.is_empty() {
        let sql = format!("ALTER TABLE {} {}", q(table), alters.join(", "));
        store
            .execute(&sql, &[])
            .await
            .with_context(|| format!("Failed to add timestamp columns to {}", table))?;
    }

    let indexed = store.indexed_columns(table).await?;
    for column in [CREATED_AT, UPDATED_AT] {
        if !has_column(&indexed, column) {
            let sql = format!(
                "ALTER TABLE {} ADD INDEX {} ({})",
                q(table),
                q(&format!("sync_{}_idx", column)),
                q(column)
            );
            store
                .execute(&sql, &[])
                .await
                .with_context(|| format!("Failed to index {}.{}", table, column))?;
            report.added_indexes.push(column);
        }
    }

    let backfill = format!(
        "UPDATE {} SET {} = NOW(3) WHERE {} IS NULL",
        q(table),
        q(CREATED_AT),
        q(CREATED_AT)
    );
    report.backfilled_rows = store
        .execute(&backfill, &[])
        .await
        .with_context(|| format!("Failed to backfill {}.{}", table, CREATED_AT))?;

    Ok(report)
}

/// SQLite cannot `ADD COLUMN` with a non-constant default, so the columns are
/// added nullable and a pair of triggers stands in for `DEFAULT CURRENT_TIMESTAMP`
/// and `ON UPDATE CURRENT_TIMESTAMP`. The update trigger only fires when the
/// writer left both tracking columns alone, so values written by the sync are kept.
async fn ensure_sqlite_tracking<S: SyncStore>(store: &mut S, table: &str) -> Result<TrackingReport> {
    let q = |ident: &str| Dialect::Sqlite.quote(ident);
    let mut report = TrackingReport::default();

    let columns = store.columns(table).await?;
    for column in [CREATED_AT, UPDATED_AT] {
        if !has_column(&columns, column) {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} TEXT", q(table), q(column));
            store
                .execute(&sql, &[])
                .await
                .with_context(|| format!("Failed to add {} to {}", column, table))?;
            report.added_columns.push(column);
        }
    }

    for column in [CREATED_AT, UPDATED_AT] {
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} IS NULL",
            q(table),
            q(column),
            SQLITE_NOW,
            q(column)
        );
        report.backfilled_rows += store
            .execute(&sql, &[])
            .await
            .with_context(|| format!("Failed to backfill {}.{}", table, column))?;
    }

    let insert_trigger = format!("{}_sync_insert", table);
    if !sqlite_trigger_exists(store, &insert_trigger).await? {
        let sql = format!(
            "CREATE TRIGGER {trigger} AFTER INSERT ON {t} FOR EACH ROW \
             WHEN NEW.{c} IS NULL OR NEW.{u} IS NULL \
             BEGIN \
               UPDATE {t} SET {c} = COALESCE(NEW.{c}, {now}), {u} = COALESCE(NEW.{u}, {now}) \
               WHERE rowid = NEW.rowid; \
             END",
            trigger = q(&insert_trigger),
            t = q(table),
            c = q(CREATED_AT),
            u = q(UPDATED_AT),
            now = SQLITE_NOW
        );
        store
            .execute(&sql, &[])
            .await
            .with_context(|| format!("Failed to create insert trigger on {}", table))?;
        report.added_triggers += 1;
    }

    let update_trigger = format!("{}_sync_update", table);
    if !sqlite_trigger_exists(store, &update_trigger).await? {
        let sql = format!(
            "CREATE TRIGGER {trigger} AFTER UPDATE ON {t} FOR EACH ROW \
             WHEN NEW.{u} IS OLD.{u} AND NEW.{c} IS OLD.{c} \
             BEGIN \
               UPDATE {t} SET {u} = {now} WHERE rowid = NEW.rowid; \
             END",
            trigger = q(&update_trigger),
            t = q(table),
            c = q(CREATED_AT),
            u = q(UPDATED_AT),
            now = SQLITE_NOW
        );
        store
            .execute(&sql, &[])
            .await
            .with_context(|| format!("Failed to create update trigger on {}", table))?;
        report.added_triggers += 1;
    }

    let indexed = store.indexed_columns(table).await?;
    for column in [CREATED_AT, UPDATED_AT] {
        if !has_column(&indexed, column) {
            let sql = format!(
                "CREATE INDEX {} ON {} ({})",
                q(&format!("{}_{}_sync_idx", table, column)),
                q(table),
                q(column)
            );
            store
                .execute(&sql, &[])
                .await
                .with_context(|| format!("Failed to index {}.{}", table, column))?;
            report.added_indexes.push(column);
        }
    }

    Ok(report)
}

async fn sqlite_trigger_exists<S: SyncStore>(store: &mut S, name: &str) -> Result<bool> {
    let rows = store
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = ?",
            &[SqlValue::Text(name.to_string())],
        )
        .await?;
    Ok(rows
        .first()
        .and_then(|r| r.at(0))
        .and_then(SqlValue::to_i64)
        .unwrap_or(0)
        > 0)
}
