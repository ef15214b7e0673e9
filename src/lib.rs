// ABOUTME: Library root for edge-cloud-sync
// ABOUTME: Exposes the reconciliation engine, store backends, configuration and helpers

pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod utils;

pub use config::{ConflictPolicy, Strategy, SyncConfig};
pub use engine::{RunCoordinator, RunOutcome, SyncRun};
pub use error::SyncError;
pub use store::{connect, detect_dialect, AnyStore, Dialect, SyncStore};
