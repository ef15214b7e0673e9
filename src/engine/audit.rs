// ABOUTME: AuditLog - one sync_logs row per run on the edge store
// ABOUTME: Records finished runs, prunes to the most recent N, and reads history back

use anyhow::{Context, Result};
use serde::Serialize;

use super::context::SyncRun;
use super::watermark::{format_timestamp, parse_timestamp};
use crate::store::{Dialect, SqlValue, SyncStore};

/// Audit table name.
pub const AUDIT_TABLE: &str = "sync_logs";

/// Rows kept by default after pruning.
pub const DEFAULT_RETENTION: usize = 100;

/// A stored audit row, as shown by `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub sync_start: String,
    pub sync_end: String,
    pub total_tables: i64,
    pub errors: String,
}

pub struct AuditLog;

impl AuditLog {
    pub async fn ensure_table<S: SyncStore>(store: &mut S) -> Result<()> {
        let ddl = match store.dialect() {
            Dialect::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 `id` INT AUTO_INCREMENT PRIMARY KEY, \
                 `sync_start` DATETIME NOT NULL, \
                 `sync_end` DATETIME NOT NULL, \
                 `total_tables` INT NOT NULL, \
                 `errors` TEXT NOT NULL, \
                 `created_at` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP)",
                Dialect::MySql.quote(AUDIT_TABLE)
            ),
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
                 \"sync_start\" TEXT NOT NULL, \
                 \"sync_end\" TEXT NOT NULL, \
                 \"total_tables\" INTEGER NOT NULL, \
                 \"errors\" TEXT NOT NULL, \
                 \"created_at\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP)",
                Dialect::Sqlite.quote(AUDIT_TABLE)
            ),
        };
        store
            .execute(&ddl, &[])
            .await
            .with_context(|| format!("Failed to create {}", AUDIT_TABLE))?;
        Ok(())
    }

    /// Append one row for a finished run.
    pub async fn record<S: SyncStore>(store: &mut S, run: &SyncRun) -> Result<()> {
        Self::ensure_table(store).await?;

        let q = |c: &str| store.dialect().quote(c);
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
            q(AUDIT_TABLE),
            q("sync_start"),
            q("sync_end"),
            q("total_tables"),
            q("errors")
        );
        let params = [
            SqlValue::Text(run.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            SqlValue::Text(run.finished_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            SqlValue::Int(i64::from(run.tables_processed)),
            SqlValue::Text(run.error_text.clone()),
        ];
        store
            .execute(&sql, &params)
            .await
            .with_context(|| format!("Failed to record run {} in {}", run.run_id, AUDIT_TABLE))?;
        Ok(())
    }

    /// Delete every row except the `keep` with the highest ids. Returns rows removed.
    pub async fn prune<S: SyncStore>(store: &mut S, keep: usize) -> Result<u64> {
        let q = |c: &str| store.dialect().quote(c);
        // MySQL refuses LIMIT directly inside IN (...); the derived table works on both
        let sql = format!(
            "DELETE FROM {t} WHERE {id} NOT IN (\
             SELECT {id} FROM (SELECT {id} FROM {t} ORDER BY {id} DESC LIMIT ?) AS recent)",
            t = q(AUDIT_TABLE),
            id = q("id")
        );
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let removed = store
            .execute(&sql, &[SqlValue::Int(keep)])
            .await
            .with_context(|| format!("Failed to prune {}", AUDIT_TABLE))?;
        if removed > 0 {
            tracing::debug!("Pruned {} old row(s) from {}", removed, AUDIT_TABLE);
        }
        Ok(removed)
    }

    /// Most recent rows, newest first.
    pub async fn recent<S: SyncStore>(store: &mut S, limit: usize) -> Result<Vec<AuditEntry>> {
        if !store.table_exists(AUDIT_TABLE).await? {
            return Ok(Vec::new());
        }

        let q = |c: &str| store.dialect().quote(c);
        let sql = format!(
            "SELECT {}, {}, {}, {}, {} FROM {} ORDER BY {} DESC LIMIT ?",
            q("id"),
            q("sync_start"),
            q("sync_end"),
            q("total_tables"),
            q("errors"),
            q(AUDIT_TABLE),
            q("id")
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = store
            .query(&sql, &[SqlValue::Int(limit)])
            .await
            .with_context(|| format!("Failed to read {}", AUDIT_TABLE))?;

        Ok(rows
            .iter()
            .map(|row| AuditEntry {
                id: row.at(0).and_then(SqlValue::to_i64).unwrap_or_default(),
                sync_start: display_time(row.at(1)),
                sync_end: display_time(row.at(2)),
                total_tables: row.at(3).and_then(SqlValue::to_i64).unwrap_or_default(),
                errors: row.at(4).and_then(SqlValue::to_text).unwrap_or_default(),
            })
            .collect())
    }
}

fn display_time(value: Option<&SqlValue>) -> String {
    match value {
        Some(v) => parse_timestamp(v)
            .map(|ts| format_timestamp(&ts))
            .or_else(|| v.to_text())
            .unwrap_or_default(),
        None => String::new(),
    }
}
