// ABOUTME: Error kinds raised by the reconciliation engine
// ABOUTME: Fatal kinds abort a run; recovered kinds are collected into the audit row

use thiserror::Error;

use crate::engine::context::Direction;

/// Errors produced while running a sync.
///
/// `Connection` and `Config` are fatal. `LockHeld` comes from
/// [`crate::engine::RunLock::acquire`] and is not really an error at all: the
/// coordinator turns it into [`crate::engine::RunOutcome::AbortedLockHeld`].
/// The remaining kinds are recovered locally and stored in the run context.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{side} database unreachable: {source:#}")]
    Connection {
        side: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Sync already running (lock held at {path})")]
    LockHeld { path: String },

    #[error("Schema sync failed for {table} on {side}: {message}")]
    Schema {
        table: String,
        side: &'static str,
        message: String,
    },

    #[error("Fetch failed for {table} ({direction}): {message}")]
    Fetch {
        table: String,
        direction: Direction,
        message: String,
    },

    #[error("Write failed on {table} ({direction}): {message}")]
    Write {
        table: String,
        direction: Direction,
        message: String,
    },

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Render an anyhow error chain on one line, suitable for the audit row.
pub(crate) fn one_line(err: &anyhow::Error) -> String {
    format!("{:#}", err).replace('\n', " ")
}
