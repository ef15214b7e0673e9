// ABOUTME: Per-run accumulator threaded through every engine component
// ABOUTME: Collects recovered errors and counters, then finalizes into a SyncRun

use std::fmt;

use chrono::{NaiveDateTime, Utc};

use crate::error::SyncError;

/// Sentinel stored in the audit row when a run recorded no errors.
pub const NO_ERRORS: &str = "No Errors";

/// Separator between messages in the audit row's error text.
pub const ERROR_SEPARATOR: &str = " | ";

/// Which way rows flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    EdgeToCloud,
    CloudToEdge,
}

impl Direction {
    /// Side the rows are read from.
    pub fn source_side(&self) -> &'static str {
        match self {
            Direction::EdgeToCloud => "edge",
            Direction::CloudToEdge => "cloud",
        }
    }

    /// Side the rows are written to.
    pub fn target_side(&self) -> &'static str {
        match self {
            Direction::EdgeToCloud => "cloud",
            Direction::CloudToEdge => "edge",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::EdgeToCloud => write!(f, "edge→cloud"),
            Direction::CloudToEdge => write!(f, "cloud→edge"),
        }
    }
}

/// Mutable state of one run.
///
/// Owned by the coordinator and passed by `&mut` into each component, so there
/// is no hidden shared state between tables.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: NaiveDateTime,
    pub tables_processed: u32,
    pub rows_synced: u64,
    pub rows_deleted: u64,
    errors: Vec<SyncError>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now().naive_utc(),
            tables_processed: 0,
            rows_synced: 0,
            rows_deleted: 0,
            errors: Vec::new(),
        }
    }

    /// Record a recovered error; it is logged immediately and reported in the audit row.
    pub fn record(&mut self, error: SyncError) {
        tracing::error!("{}", error);
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Fold another context's results into this one.
    pub fn merge(&mut self, other: RunContext) {
        self.tables_processed += other.tables_processed;
        self.rows_synced += other.rows_synced;
        self.rows_deleted += other.rows_deleted;
        self.errors.extend(other.errors);
    }

    /// Close the run and produce its audit record.
    pub fn finish(self) -> SyncRun {
        let error_text = if self.errors.is_empty() {
            NO_ERRORS.to_string()
        } else {
            self.errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(ERROR_SEPARATOR)
        };

        SyncRun {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now().naive_utc(),
            tables_processed: self.tables_processed,
            rows_synced: self.rows_synced,
            rows_deleted: self.rows_deleted,
            error_count: self.errors.len(),
            error_text,
        }
    }
}

/// Summary of a finished run, as persisted by the audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub run_id: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub tables_processed: u32,
    pub rows_synced: u64,
    pub rows_deleted: u64,
    pub error_count: usize,
    pub error_text: String,
}

impl SyncRun {
    pub fn is_success(&self) -> bool {
        self.error_count == 0
    }
}
