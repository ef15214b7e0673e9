// ABOUTME: SyncConfig - run settings loaded from TOML and overridden from the command line
// ABOUTME: Connection URLs are deliberately not part of it; they come from flags or the environment

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::audit::{AUDIT_TABLE, DEFAULT_RETENTION};
use crate::engine::lock;
use crate::engine::tombstone::TOMBSTONE_TABLE;
use crate::error::SyncError;

/// Rows per fetch page and upsert statement.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Bookkeeping tables that are never synchronized, whatever the configuration says.
pub const BOOKKEEPING_TABLES: [&str; 3] = [AUDIT_TABLE, TOMBSTONE_TABLE, "sync_lock"];

/// How a run moves data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Watermark-based upserts in both directions, plus delete propagation.
    #[default]
    IncrementalUpsert,
    /// Drop and rebuild every cloud table from the edge copy.
    FullResync,
}

/// Which write wins when the same row changed on both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The row with the later `updated_at` wins; ties go to the later direction.
    #[default]
    NewestWins,
    /// Whatever was applied last (cloud→edge runs second) wins.
    LastDirectionWins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub strategy: Strategy,
    pub conflict_policy: ConflictPolicy,
    pub batch_size: usize,
    pub audit_retention: usize,
    /// Extra tables to leave alone, on top of the bookkeeping tables.
    pub exclude_tables: Vec<String>,
    pub lock_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            conflict_policy: ConflictPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            audit_retention: DEFAULT_RETENTION,
            exclude_tables: vec!["audit_logs".to_string(), "log_entries".to_string()],
            lock_path: None,
            log_path: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sync configuration")
    }

    /// Load a config file; a missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Load `~/.edge-cloud-sync/config.toml` if present, else defaults.
    pub fn load_default() -> Result<Self> {
        let path = lock::state_dir()?.join("config.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".to_string()));
        }
        if self.audit_retention == 0 {
            return Err(SyncError::Config(
                "audit_retention must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Tables never synchronized: the bookkeeping tables plus `exclude_tables`.
    pub fn exclusion_set(&self) -> BTreeSet<String> {
        BOOKKEEPING_TABLES
            .iter()
            .map(|t| t.to_string())
            .chain(self.exclude_tables.iter().map(|t| t.trim().to_string()))
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn lock_path(&self) -> Result<PathBuf> {
        match &self.lock_path {
            Some(path) => Ok(path.clone()),
            None => lock::default_lock_path(),
        }
    }

    pub fn log_path(&self) -> Result<PathBuf> {
        match &self.log_path {
            Some(path) => Ok(path.clone()),
            None => lock::default_log_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.strategy, Strategy::IncrementalUpsert);
        assert_eq!(config.conflict_policy, ConflictPolicy::NewestWins);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.audit_retention, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            strategy = "full-resync"
            batch_size = 200
            exclude_tables = ["sessions"]
            lock_path = "/tmp/ecs.lock"
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, Strategy::FullResync);
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.audit_retention, 100);
        assert_eq!(config.conflict_policy, ConflictPolicy::NewestWins);
        assert_eq!(config.lock_path().unwrap(), PathBuf::from("/tmp/ecs.lock"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(SyncConfig::from_toml_str("edge_url = \"mysql://x\"").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = SyncConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let config = SyncConfig {
            audit_retention: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exclusion_set_always_has_bookkeeping_tables() {
        let config = SyncConfig {
            exclude_tables: vec!["sessions".to_string(), " ".to_string()],
            ..Default::default()
        };
        let excluded = config.exclusion_set();
        for table in ["sync_logs", "deleted_rows", "sync_lock", "sessions"] {
            assert!(excluded.contains(table), "{} missing", table);
        }
        assert!(!excluded.contains("audit_logs"));
        assert_eq!(excluded.len(), 4);
    }
}
