//! Liveness marker
//!
//! A pid file written when a monitor starts and removed when it stops
//! cleanly. Its presence plus a liveness check of the recorded pid is the
//! only cross-process "is the monitor running" signal.
//!
//! This is best-effort liveness, not a lock: a pid can be reused by an
//! unrelated process after a crash. Mutations of the state document are
//! serialized by [`crate::lock::MutationLock`] instead.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Whether a process with this pid currently exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a process with this pid currently exists
///
/// Without a portable check, a recorded pid is trusted.
#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}

/// Pid file next to the state document
#[derive(Debug, Clone)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    /// Create a marker handle for `path` (nothing is written yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid of a live holder, clearing the marker if it is stale
    pub async fn live_pid(&self) -> Result<Option<u32>> {
        match self.read_pid().await? {
            Some(pid) if process_alive(pid) => Ok(Some(pid)),
            Some(pid) => {
                warn!(pid, path = %self.path.display(), "Clearing stale liveness marker");
                self.remove().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Claim the marker for `pid`
    ///
    /// Fails with [`Error::ConcurrentStartRejected`] if a live process holds
    /// it, including this one: a second monitor in the same process is still
    /// a second monitor. A stale marker is cleared and claimed.
    pub async fn claim(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        // Two attempts: the second follows clearing a stale marker
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(format!("{}\n", pid).as_bytes()).await?;
                    file.sync_all().await?;
                    debug!(pid, path = %self.path.display(), "Liveness marker claimed");
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(holder) = self.live_pid().await? {
                        return Err(Error::ConcurrentStartRejected { pid: holder });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::state_store(format!(
            "Liveness marker {} keeps reappearing",
            self.path.display()
        )))
    }

    /// Remove the marker if it still records `pid`
    pub async fn release(&self, pid: u32) -> Result<()> {
        match self.read_pid().await? {
            Some(holder) if holder == pid => self.remove().await,
            Some(holder) => {
                warn!(pid, holder, "Liveness marker owned by another process; leaving it");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Recorded pid, without any liveness check
    ///
    /// An unparsable marker is treated as absent and removed.
    pub async fn read_pid(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match content.trim().parse::<u32>() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                warn!(path = %self.path.display(), "Removing unparsable liveness marker");
                self.remove().await?;
                Ok(None)
            }
        }
    }

    async fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
