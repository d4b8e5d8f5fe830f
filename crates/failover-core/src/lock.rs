//! Mutation lock
//!
//! Single-writer discipline for the state document. Every mutator (monitor
//! tick commit, manual switch, setup, cleanup) holds the lock across its whole
//! load → reconcile → write sequence, so the monitor and an operator command
//! never run `PointAliasTo` at the same time.
//!
//! Two layers:
//! - an async mutex serializes tasks within one process
//! - an optional lock file (exclusive create) serializes processes
//!
//! The lock file holds an owner token, `<pid> <nonce>`. A guard removes the
//! file on drop only while it still holds its own token.
//!
//! A lock file is reclaimed when its holder pid is dead. A live holder is
//! never reclaimed, however long it holds the lock; the stale age only
//! applies to files whose pid cannot be read. Reclaiming renames the file
//! aside before retrying the exclusive create, so two waiters cannot both
//! remove it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::liveness::process_alive;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static NONCE: AtomicU64 = AtomicU64::new(0);

/// Mutation lock shared by all mutators of one state document
#[derive(Debug, Clone)]
pub struct MutationLock {
    local: Arc<Mutex<()>>,
    file: Option<PathBuf>,
    acquire_timeout: Duration,
    stale_after: Duration,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct MutationGuard {
    _local: OwnedMutexGuard<()>,
    file: Option<HeldFile>,
}

#[derive(Debug)]
struct HeldFile {
    path: PathBuf,
    token: String,
}

impl MutationLock {
    /// Lock that only serializes tasks within this process
    pub fn in_process() -> Self {
        Self {
            local: Arc::new(Mutex::new(())),
            file: None,
            acquire_timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
        }
    }

    /// Lock that also serializes processes through `path`
    pub fn file(path: impl Into<PathBuf>, acquire_timeout: Duration, stale_after: Duration) -> Self {
        Self {
            local: Arc::new(Mutex::new(())),
            file: Some(path.into()),
            acquire_timeout,
            stale_after,
        }
    }

    /// Acquire the lock, waiting at most the configured timeout
    pub async fn acquire(&self) -> Result<MutationGuard> {
        let deadline = tokio::time::Instant::now() + self.acquire_timeout;

        let local = tokio::time::timeout_at(deadline, self.local.clone().lock_owned())
            .await
            .map_err(|_| Error::LockTimeout("in-process".to_string()))?;

        let Some(path) = &self.file else {
            return Ok(MutationGuard {
                _local: local,
                file: None,
            });
        };

        let token = owner_token();
        loop {
            if try_create(path, &token).await? {
                debug!(path = %path.display(), "Mutation lock acquired");
                return Ok(MutationGuard {
                    _local: local,
                    file: Some(HeldFile {
                        path: path.clone(),
                        token,
                    }),
                });
            }

            if let Some(observed) = self.stale_content(path).await {
                reclaim(path, &observed, &token).await?;
                continue;
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::LockTimeout(path.display().to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Content of the lock file if its holder has abandoned it
    async fn stale_content(&self, path: &Path) -> Option<String> {
        let content = fs::read_to_string(path).await.ok()?;

        if let Some(pid) = holder_pid(&content) {
            return (!process_alive(pid)).then_some(content);
        }

        let age = fs::metadata(path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
        (age > self.stale_after).then_some(content)
    }
}

fn owner_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let count = NONCE.fetch_add(1, Ordering::Relaxed);
    format!("{} {:x}{:04x}", std::process::id(), nanos, count & 0xffff)
}

fn holder_pid(content: &str) -> Option<u32> {
    content.split_whitespace().next()?.parse().ok()
}

async fn try_create(path: &Path, token: &str) -> Result<bool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(mut file) => {
            file.write_all(format!("{}\n", token).as_bytes()).await?;
            file.sync_all().await?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move an abandoned lock file out of the way
///
/// The rename is atomic, so of several waiters only one moves any given
/// file. If the moved file is not the one judged stale (another waiter
/// reclaimed and re-locked in between), it is linked back into place.
async fn reclaim(path: &Path, observed: &str, token: &str) -> Result<()> {
    let parked = parked_path(path, token);
    match fs::rename(path, &parked).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let moved = fs::read_to_string(&parked).await.unwrap_or_default();
    if moved == observed {
        warn!(path = %path.display(), holder = moved.trim(), "Reclaimed abandoned mutation lock");
    } else if let Err(e) = fs::hard_link(&parked, path).await {
        warn!(path = %path.display(), error = %e, "Failed to restore a live mutation lock");
    }

    if let Err(e) = fs::remove_file(&parked).await {
        warn!(path = %parked.display(), error = %e, "Failed to remove reclaimed lock file");
    }
    Ok(())
}

fn parked_path(path: &Path, token: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    path.with_file_name(format!("{}.stale.{}", name, token.replace(' ', "-")))
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        let Some(held) = &self.file else {
            return;
        };

        // Only a dead pid makes a tokened file reclaimable, so nobody else
        // can swap it between this read and the remove.
        match std::fs::read_to_string(&held.path) {
            Ok(content) if content.trim() == held.token => {
                if let Err(e) = std::fs::remove_file(&held.path) {
                    warn!(path = %held.path.display(), error = %e, "Failed to release mutation lock");
                }
            }
            Ok(content) => {
                warn!(
                    path = %held.path.display(),
                    holder = content.trim(),
                    "Mutation lock taken over by another holder; leaving it in place"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %held.path.display(), "Mutation lock file vanished while held");
            }
            Err(e) => {
                warn!(path = %held.path.display(), error = %e, "Failed to release mutation lock");
            }
        }
    }
}
