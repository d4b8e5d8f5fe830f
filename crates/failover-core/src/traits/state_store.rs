// # State Store Trait
//
// Defines the interface for the persisted state document.
//
// ## Purpose
//
// The state document is the single source of truth for "what DNS currently
// points to". It is shared between the monitor process and one-shot operator
// commands, so it is only ever read and written as a whole:
//
// - `load()` returns a full snapshot
// - `compare_and_swap()` replaces the snapshot only if nobody else wrote since
//   it was read (tracked by a monotonically increasing revision)
//
// ## Implementations
//
// - File-based: JSON document with atomic replace (`FileStateStore`)
// - In-memory: tests and embedding (`MemoryStateStore`)
//
// ## Usage
//
// ```rust,ignore
// let doc = store.load().await?.ok_or(Error::ConfigMissing)?;
// let mut next = doc.clone();
// next.state.consecutive_failures += 1;
// let stored = store.compare_and_swap(Some(doc.revision), next).await?;
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FailoverConfig;
use crate::machine::{FailoverState, Side};
use crate::traits::dns_provider::DnsRecordRef;

/// State document format version
pub const STATE_FORMAT_VERSION: &str = "1.0";

/// The records created by setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedRecords {
    /// Primary host A record
    pub primary: DnsRecordRef,
    /// Backup host A record
    pub backup: DnsRecordRef,
    /// Alias CNAME record (id changes on every reconciliation)
    pub alias: DnsRecordRef,
}

/// The persisted state document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Format version
    pub version: String,
    /// Incremented by the store on every successful write
    pub revision: u64,
    /// Topology fixed at setup
    pub config: FailoverConfig,
    /// Mutable failover state
    pub state: FailoverState,
    /// Provider record references
    pub records: ManagedRecords,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
}

impl StateDocument {
    /// Create the document written by setup
    ///
    /// # Visibility
    ///
    /// `pub(crate)`: documents are only created by setup. The revision is
    /// assigned by the store on first write.
    pub(crate) fn new(config: FailoverConfig, records: ManagedRecords, now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_FORMAT_VERSION.to_string(),
            revision: 0,
            config,
            state: FailoverState::initial(now),
            records,
            updated_at: now,
        }
    }

    /// Host record the alias should point at for the active side
    pub fn active_target(&self) -> &str {
        self.config.record_for(self.state.active_side)
    }

    /// Address of the active backend
    pub fn active_ip(&self) -> std::net::IpAddr {
        self.config.ip_for(self.state.active_side)
    }

    /// Side whose host record is `target`, if any
    pub fn side_for_target(&self, target: &str) -> Option<Side> {
        let target = target.trim_end_matches('.');
        if target.eq_ignore_ascii_case(&self.config.primary_record) {
            Some(Side::Primary)
        } else if target.eq_ignore_ascii_case(&self.config.backup_record) {
            Some(Side::Backup)
        } else {
            None
        }
    }
}

/// Trait for state store implementations
///
/// # Atomicity
///
/// Readers always observe a complete document. Writers must base every write
/// on a revision they loaded; a write against a stale revision fails with
/// [`crate::Error::StateConflict`] and changes nothing.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the full document
    ///
    /// - `Ok(Some(doc))`: the stored document
    /// - `Ok(None)`: setup has not been performed
    async fn load(&self) -> Result<Option<StateDocument>, crate::Error>;

    /// Replace the document if its revision still equals `expected_revision`
    ///
    /// `expected_revision = None` means "only if no document exists". On
    /// success the stored document (with its new revision and timestamp) is
    /// returned.
    async fn compare_and_swap(
        &self,
        expected_revision: Option<u64>,
        next: StateDocument,
    ) -> Result<StateDocument, crate::Error>;

    /// Delete the document (no-op if absent)
    async fn delete(&self) -> Result<(), crate::Error>;
}

/// Revision a successful write stores, shared by implementations
pub(crate) fn next_revision(current: Option<&StateDocument>) -> u64 {
    current.map(|doc| doc.revision + 1).unwrap_or(1)
}

/// Check a compare-and-swap precondition, shared by implementations
pub(crate) fn check_revision(
    expected: Option<u64>,
    current: Option<&StateDocument>,
) -> Result<(), crate::Error> {
    let found = current.map(|doc| doc.revision);
    if expected == found {
        Ok(())
    } else {
        Err(crate::Error::StateConflict { expected, found })
    }
}
