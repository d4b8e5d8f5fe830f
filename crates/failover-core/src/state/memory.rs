// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Provides a state store that doesn't persist across restarts. Useful for
// tests and for embedding the controller where another component owns
// persistence.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - A restarted controller reports `ConfigMissing` until setup runs again

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{StateDocument, StateStore, check_revision, next_revision};

/// In-memory state store implementation
///
/// Clones share the same document, which lets tests hand one clone to the
/// controller and inspect another.
///
/// # Example
///
/// ```rust,no_run
/// use failover_core::state::MemoryStateStore;
/// use failover_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     assert!(store.load().await?.is_none());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<Option<StateDocument>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the store holds no document
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_none()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StateDocument>, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn compare_and_swap(
        &self,
        expected_revision: Option<u64>,
        mut next: StateDocument,
    ) -> Result<StateDocument, Error> {
        let mut guard = self.inner.write().await;
        check_revision(expected_revision, guard.as_ref())?;

        next.revision = next_revision(guard.as_ref());
        next.updated_at = chrono::Utc::now();
        *guard = Some(next.clone());
        Ok(next)
    }

    async fn delete(&self) -> Result<(), Error> {
        *self.inner.write().await = None;
        Ok(())
    }
}
