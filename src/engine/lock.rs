// ABOUTME: RunLock - single-run mutual exclusion through an atomically created lock file
// ABOUTME: Guard removes the file on drop; status/unlock inspect a lock left by a dead process

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{one_line, SyncError};

/// Directory for the lock, log and config files: `~/.edge-cloud-sync/`.
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".edge-cloud-sync"))
}

pub fn default_lock_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("sync.lock"))
}

pub fn default_log_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("sync.log"))
}

/// Diagnostic contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: String,
}

/// Held for the duration of a run. Dropping it releases the lock.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file if, and only if, it does not exist yet.
    ///
    /// Fails with [`SyncError::LockHeld`] when another run holds the lock and
    /// with [`SyncError::Config`] when the lock file cannot be created.
    pub fn acquire(path: &Path) -> Result<RunLock, SyncError> {
        Self::create(path).map_err(|e| SyncError::Config(one_line(&e)))?.ok_or_else(|| {
            SyncError::LockHeld {
                path: path.display().to_string(),
            }
        })
    }

    fn create(path: &Path) -> Result<Option<RunLock>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create lock directory: {:?}", parent))?;
            }
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create lock file: {:?}", path))
            }
        };
        let lock = RunLock {
            path: path.to_path_buf(),
        };

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        };
        let body = serde_json::to_string(&info).context("Failed to serialize lock info")?;
        file.write_all(body.as_bytes())
            .with_context(|| format!("Failed to write lock file: {:?}", path))?;

        tracing::debug!("Acquired run lock {:?}", path);
        Ok(Some(lock))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Released run lock {:?}", self.path),
            Err(e) => tracing::warn!("Failed to remove lock file {:?}: {}", self.path, e),
        }
    }
}

/// What `status` reports about a lock path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub path: PathBuf,
    pub held: bool,
    pub info: Option<LockInfo>,
    pub holder_running: bool,
}

/// Inspect the lock without touching it.
pub fn status(path: &Path) -> Result<LockStatus> {
    if !path.exists() {
        return Ok(LockStatus {
            path: path.to_path_buf(),
            held: false,
            info: None,
            holder_running: false,
        });
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read lock file: {:?}", path))?;
    let info: Option<LockInfo> = serde_json::from_str(&content).ok();
    let holder_running = info
        .as_ref()
        .map(|i| is_process_running(i.pid))
        .unwrap_or(false);

    Ok(LockStatus {
        path: path.to_path_buf(),
        held: true,
        info,
        holder_running,
    })
}

/// Result of an `unlock` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    NotHeld,
    Removed,
    HolderRunning(u32),
    /// The lock file has no readable holder, e.g. a run that is still writing it.
    HolderUnknown,
}

/// Remove a stale lock; refuses while the recorded holder is still alive.
///
/// A lock whose holder cannot be read is only removed with `force`.
pub fn unlock(path: &Path, force: bool) -> Result<UnlockOutcome> {
    let current = status(path)?;
    if !current.held {
        return Ok(UnlockOutcome::NotHeld);
    }
    match &current.info {
        Some(info) if current.holder_running => return Ok(UnlockOutcome::HolderRunning(info.pid)),
        None if !force => return Ok(UnlockOutcome::HolderUnknown),
        _ => {}
    }

    fs::remove_file(path).with_context(|| format!("Failed to remove lock file: {:?}", path))?;
    tracing::info!("Removed stale lock {:?}", path);
    Ok(UnlockOutcome::Removed)
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists; EPERM means it exists under another user
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    // No cheap liveness check; assume alive so unlock never removes a live lock
    true
}
