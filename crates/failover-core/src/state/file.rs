// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Persists the state document so a restarted monitor resumes exactly where
// the previous one stopped, and so operator commands running in another
// process see what the monitor wrote.
//
// ## Crash Recovery
//
// - Atomic writes: the document is written to `<path>.tmp`, synced, then
//   renamed over `<path>`; readers never see a half-written document
// - Automatic backup: the previous document is kept in `<path>.backup`
// - Corruption detection: JSON is validated on every load
// - Recovery: falls back to the backup if the main file is corrupted
//
// ## No caching
//
// Every `load()` reads the file. Another process may have written since the
// last call, and a cached copy would silently defeat compare-and-swap.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "revision": 42,
//   "config": { "alias": "app.example.com", ... },
//   "state": { "active_side": "PRIMARY", "consecutive_failures": 1, ... },
//   "records": { "primary": {...}, "backup": {...}, "alias": {...} },
//   "updated_at": "2025-01-09T12:00:00Z"
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::traits::state_store::{
    STATE_FORMAT_VERSION, StateDocument, StateStore, check_revision, next_revision,
};

/// File-based state store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use failover_core::state::FileStateStore;
/// use failover_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/dns-failover/state.json").await?;
///     match store.load().await? {
///         Some(doc) => println!("active side: {}", doc.state.active_side),
///         None => println!("not configured"),
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    /// Serializes writers within this process; cross-process writers are
    /// serialized by [`crate::lock::MutationLock`] and detected by revision
    write_guard: Mutex<()>,
}

impl FileStateStore {
    /// Create a file state store, creating parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self {
            path,
            write_guard: Mutex::new(()),
        })
    }

    /// Path of the state document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load the main state file
    /// 2. If it is corrupted, try the backup and restore the main file from it
    /// 3. If both are corrupted, fail: starting from nothing would forget
    ///    which records exist and which side is active
    async fn load_with_recovery(&self) -> Result<Option<StateDocument>, Error> {
        match Self::read_document(&self.path).await {
            Ok(doc) => Ok(doc),
            Err(ReadError::Corrupt(e)) => {
                tracing::warn!(
                    "State file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(&self.path);
                match Self::read_document(&backup_path).await {
                    Ok(Some(doc)) => {
                        tracing::info!(revision = doc.revision, "Recovered state from backup");
                        if let Err(restore_err) =
                            Self::restore_from_backup(&self.path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore state file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(Some(doc))
                    }
                    Ok(None) => Err(Error::state_store(format!(
                        "State file {} is corrupted and no backup exists: {}",
                        self.path.display(),
                        e
                    ))),
                    Err(backup_err) => Err(Error::state_store(format!(
                        "State file {} and its backup are corrupted: {}; {}",
                        self.path.display(),
                        e,
                        backup_err
                    ))),
                }
            }
            Err(ReadError::Io(e)) => Err(e),
        }
    }

    /// Read and parse one document file
    async fn read_document(path: &Path) -> Result<Option<StateDocument>, ReadError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!("State file does not exist: {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(ReadError::Io(Error::state_store(format!(
                    "Failed to read state file {}: {}",
                    path.display(),
                    e
                ))));
            }
        };

        let doc: StateDocument = serde_json::from_str(&content).map_err(|e| {
            ReadError::Corrupt(format!("Failed to parse state file {}: {}", path.display(), e))
        })?;

        if doc.version != STATE_FORMAT_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FORMAT_VERSION,
                doc.version
            );
        }

        if !doc.state.is_consistent() {
            return Err(ReadError::Corrupt(format!(
                "State file {} has both failure and recovery counters set",
                path.display()
            )));
        }

        Ok(Some(doc))
    }

    /// Write a document atomically
    async fn write_document(&self, doc: &StateDocument) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = Self::temp_path(&self.path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Keep the last known good document
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!(revision = doc.revision, "State written to {}", self.path.display());
        Ok(())
    }

    /// Restore state file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".backup");
        PathBuf::from(backup)
    }

    async fn remove_if_exists(path: &Path) -> Result<(), Error> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::state_store(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

enum ReadError {
    /// File exists but does not hold a valid document
    Corrupt(String),
    /// File could not be read
    Io(Error),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Corrupt(message) => f.write_str(message),
            ReadError::Io(e) => write!(f, "{}", e),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<StateDocument>, Error> {
        self.load_with_recovery().await
    }

    async fn compare_and_swap(
        &self,
        expected_revision: Option<u64>,
        mut next: StateDocument,
    ) -> Result<StateDocument, Error> {
        let _guard = self.write_guard.lock().await;

        let current = self.load_with_recovery().await?;
        check_revision(expected_revision, current.as_ref())?;

        next.revision = next_revision(current.as_ref());
        next.updated_at = chrono::Utc::now();
        self.write_document(&next).await?;
        Ok(next)
    }

    async fn delete(&self) -> Result<(), Error> {
        let _guard = self.write_guard.lock().await;

        Self::remove_if_exists(&self.path).await?;
        Self::remove_if_exists(&Self::backup_path(&self.path)).await?;
        Self::remove_if_exists(&Self::temp_path(&self.path)).await?;
        Ok(())
    }
}
