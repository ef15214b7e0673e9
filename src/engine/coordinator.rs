// ABOUTME: RunCoordinator - one complete edge/cloud reconciliation run
// ABOUTME: Lock, enumerate, per-table sync in both directions, tombstones, audit, unlock

use std::collections::BTreeSet;

use tracing::Instrument;
use uuid::Uuid;

use super::audit::AuditLog;
use super::context::{Direction, RunContext, SyncRun};
use super::lock::RunLock;
use super::schema::SchemaReconciler;
use super::tombstone::TombstonePropagator;
use super::upsert::RowBatchUpserter;
use super::watermark::WatermarkTracker;
use crate::config::{Strategy, SyncConfig};
use crate::error::{one_line, SyncError};
use crate::store::SyncStore;
use crate::utils::validate_identifier;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run went through; per-table problems are listed in the record.
    Completed(SyncRun),
    /// Another run holds the lock. Nothing was read or written.
    AbortedLockHeld,
}

pub struct RunCoordinator {
    config: SyncConfig,
}

impl RunCoordinator {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one reconciliation between `edge` and `cloud`.
    ///
    /// Fails only for unusable configuration, an unreachable database or two
    /// sides whose `updated_at` clocks disagree; all are detected before the
    /// lock is taken.
    pub async fn run<E: SyncStore, C: SyncStore>(
        &self,
        edge: &mut E,
        cloud: &mut C,
    ) -> Result<RunOutcome, SyncError> {
        self.config.validate()?;

        edge.ping()
            .await
            .map_err(|source| SyncError::Connection { side: "edge", source })?;
        cloud
            .ping()
            .await
            .map_err(|source| SyncError::Connection { side: "cloud", source })?;
        check_clock_basis(edge.utc_offset_seconds(), cloud.utc_offset_seconds())?;

        let lock_path = self
            .config
            .lock_path()
            .map_err(|e| SyncError::Config(one_line(&e)))?;
        let _lock = match RunLock::acquire(&lock_path) {
            Ok(lock) => lock,
            Err(SyncError::LockHeld { path }) => {
                tracing::info!("Sync already running (lock held at {})", path);
                return Ok(RunOutcome::AbortedLockHeld);
            }
            Err(e) => return Err(e),
        };

        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("sync_run", run_id = %run_id);
        let run = self
            .run_locked(edge, cloud, RunContext::new(run_id))
            .instrument(span)
            .await;

        Ok(RunOutcome::Completed(run))
    }

    async fn run_locked<E: SyncStore, C: SyncStore>(
        &self,
        edge: &mut E,
        cloud: &mut C,
        mut ctx: RunContext,
    ) -> SyncRun {
        tracing::info!(
            "Sync started: {} -> {} ({:?})",
            edge.describe(),
            cloud.describe(),
            self.config.strategy
        );

        let excluded = self.config.exclusion_set();
        let tables = self.enumerate_tables(edge, &excluded, &mut ctx).await;

        match self.config.strategy {
            Strategy::IncrementalUpsert => {
                self.incremental(edge, cloud, &tables, &excluded, &mut ctx).await
            }
            Strategy::FullResync => self.full_resync(edge, cloud, &tables, &mut ctx).await,
        }

        let run = ctx.finish();
        self.finalize(edge, &run).await;

        tracing::info!(
            "Sync finished: {} table(s), {} row(s) synced, {} row(s) deleted, {} error(s)",
            run.tables_processed,
            run.rows_synced,
            run.rows_deleted,
            run.error_count
        );
        run
    }

    /// Edge tables, sorted, without excluded or unusable names.
    async fn enumerate_tables<E: SyncStore>(
        &self,
        edge: &mut E,
        excluded: &BTreeSet<String>,
        ctx: &mut RunContext,
    ) -> Vec<String> {
        let mut tables = match edge.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                ctx.record(SyncError::Fetch {
                    table: "table list".to_string(),
                    direction: Direction::EdgeToCloud,
                    message: one_line(&e),
                });
                return Vec::new();
            }
        };
        tables.sort();

        let mut selected = Vec::with_capacity(tables.len());
        for table in tables {
            if excluded.contains(&table) {
                tracing::debug!("Skipping excluded table {}", table);
                continue;
            }
            if validate_identifier(&table).is_err() {
                ctx.record(SyncError::InvalidIdentifier(table));
                continue;
            }
            selected.push(table);
        }
        tracing::info!("{} table(s) to sync", selected.len());
        selected
    }

    async fn incremental<E: SyncStore, C: SyncStore>(
        &self,
        edge: &mut E,
        cloud: &mut C,
        tables: &[String],
        excluded: &BTreeSet<String>,
        ctx: &mut RunContext,
    ) {
        let upserter = RowBatchUpserter::new(self.config.batch_size, self.config.conflict_policy);

        for table in tables {
            ctx.tables_processed += 1;
            tracing::info!("Syncing {}", table);

            if !SchemaReconciler::reconcile(table, edge, "edge", cloud, "cloud", ctx).await {
                continue;
            }

            // Both watermarks are read before either direction writes anything
            let to_cloud = WatermarkTracker::compute(cloud, table, Direction::EdgeToCloud).await;
            let to_edge = WatermarkTracker::compute(edge, table, Direction::CloudToEdge).await;

            upserter.sync(table, edge, cloud, &to_cloud, ctx).await;
            upserter.sync(table, cloud, edge, &to_edge, ctx).await;
        }

        for (side, result) in [
            ("edge", TombstonePropagator::ensure_table(edge).await),
            ("cloud", TombstonePropagator::ensure_table(cloud).await),
        ] {
            if let Err(e) = result {
                ctx.record(SyncError::Schema {
                    table: super::tombstone::TOMBSTONE_TABLE.to_string(),
                    side,
                    message: one_line(&e),
                });
            }
        }

        let propagator = TombstonePropagator::new(excluded);
        propagator
            .propagate(cloud, edge, Direction::CloudToEdge, ctx)
            .await;
        propagator
            .propagate(edge, cloud, Direction::EdgeToCloud, ctx)
            .await;
    }

    async fn full_resync<E: SyncStore, C: SyncStore>(
        &self,
        edge: &mut E,
        cloud: &mut C,
        tables: &[String],
        ctx: &mut RunContext,
    ) {
        let upserter = RowBatchUpserter::new(self.config.batch_size, self.config.conflict_policy);

        for table in tables {
            ctx.tables_processed += 1;
            tracing::info!("Rebuilding {} on cloud", table);

            if let Err(e) = SchemaReconciler::recreate(table, edge, cloud).await {
                ctx.record(SyncError::Schema {
                    table: table.clone(),
                    side: "cloud",
                    message: one_line(&e),
                });
                continue;
            }
            upserter.copy_all(table, edge, cloud, ctx).await;
        }
    }

    async fn finalize<E: SyncStore>(&self, edge: &mut E, run: &SyncRun) {
        if let Err(e) = AuditLog::record(edge, run).await {
            tracing::error!("Failed to write audit record: {:#}", e);
            return;
        }
        if let Err(e) = AuditLog::prune(edge, self.config.audit_retention).await {
            tracing::error!("Failed to prune audit records: {:#}", e);
        }
    }
}

/// Watermarks compare timestamps written on one side against timestamps
/// written on the other, so both must be stamped in the same time zone.
fn check_clock_basis(edge_offset: i64, cloud_offset: i64) -> Result<(), SyncError> {
    if edge_offset == cloud_offset {
        return Ok(());
    }
    Err(SyncError::Config(format!(
        "edge and cloud stamp {} in different time zones (edge {}, cloud {}); \
         set the MySQL time_zone so both sides agree (SQLite always stamps UTC)",
        super::schema::UPDATED_AT,
        format_offset(edge_offset),
        format_offset(cloud_offset)
    )))
}

fn format_offset(seconds: i64) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!("UTC{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_basis_requires_matching_offsets() {
        assert!(check_clock_basis(0, 0).is_ok());
        assert!(check_clock_basis(21_600, 21_600).is_ok());

        let err = check_clock_basis(0, 21_600).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("edge UTC+00:00, cloud UTC+06:00"));
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(20_700), "UTC+05:45");
        assert_eq!(format_offset(-18_000), "UTC-05:00");
    }
}
