// ABOUTME: Bidirectional reconciliation engine between an edge and a cloud store
// ABOUTME: Watermark change detection, batched upserts, tombstones, run lock and audit trail

pub mod audit;
pub mod context;
pub mod coordinator;
pub mod lock;
pub mod schema;
pub mod tombstone;
pub mod upsert;
pub mod watermark;

pub use audit::{AuditEntry, AuditLog};
pub use context::{Direction, RunContext, SyncRun, NO_ERRORS};
pub use coordinator::{RunCoordinator, RunOutcome};
pub use lock::{LockInfo, LockStatus, RunLock, UnlockOutcome};
pub use schema::{SchemaReconciler, TableDescriptor, CREATED_AT, UPDATED_AT};
pub use tombstone::{Tombstone, TombstonePropagator};
pub use upsert::{ChangeCursor, RowBatchUpserter};
pub use watermark::{Watermark, WatermarkTracker, EPOCH_FLOOR};
