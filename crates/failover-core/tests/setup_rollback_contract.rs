//! Contract Test: Setup, Rollback and Cleanup
//!
//! Constraints verified:
//! - Setup creates primary A, backup A and the alias CNAME (pointing at
//!   primary) and writes the initial state
//! - A failure at any step of setup deletes every record created during that
//!   attempt; no state document is written
//! - A state write failure after the records exist also rolls them back
//! - Setup refuses to run over an existing configuration
//! - Cleanup removes records and state, refuses while a monitor is alive, and
//!   keeps state when the provider fails

mod common;

use async_trait::async_trait;
use common::*;
use failover_core::machine::Side;
use failover_core::traits::{StateDocument, StateStore};
use failover_core::{Error, MemoryStateStore, RecordType};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

/// Store that loads fine but refuses every write
struct ReadOnlyStore(MemoryStateStore);

#[async_trait]
impl StateStore for ReadOnlyStore {
    async fn load(&self) -> failover_core::Result<Option<StateDocument>> {
        self.0.load().await
    }

    async fn compare_and_swap(
        &self,
        _expected_revision: Option<u64>,
        _next: StateDocument,
    ) -> failover_core::Result<StateDocument> {
        Err(Error::state_store("disk full"))
    }

    async fn delete(&self) -> failover_core::Result<()> {
        self.0.delete().await
    }
}

#[tokio::test]
async fn setup_creates_topology_and_state() {
    let h = Harness::new();
    let doc = assert_ok!(h.controller.setup(setup_request(2, 3)).await);

    assert_eq!(doc.revision, 1);
    assert_eq!(doc.config.alias, ALIAS);
    assert_eq!(doc.config.primary_record, PRIMARY);
    assert_eq!(doc.config.backup_record, BACKUP);
    assert_eq!(doc.state.active_side, Side::Primary);
    assert_eq!(doc.state.consecutive_failures, 0);
    assert_eq!(doc.state.consecutive_recoveries, 0);

    assert_eq!(h.provider.records().len(), 3);
    assert_eq!(h.provider.records_named(PRIMARY, RecordType::A)[0].content, "192.0.2.10");
    assert_eq!(h.provider.records_named(BACKUP, RecordType::A)[0].content, "192.0.2.20");
    assert_eq!(h.provider.alias_target(ALIAS), PRIMARY);

    // Stored ids match the live records
    assert_eq!(doc.records.alias.id, h.provider.records_named(ALIAS, RecordType::Cname)[0].id);
    assert_eq!(h.document().await, doc);
}

#[tokio::test]
async fn alias_failure_rolls_back_host_records() {
    let h = Harness::new();
    h.provider.fail_next_for(Op::Create, ALIAS, 1);

    assert_err!(h.controller.setup(setup_request(2, 3)).await);

    assert!(h.provider.records().is_empty(), "left behind: {:?}", h.provider.records());
    assert!(h.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn backup_failure_rolls_back_primary() {
    let h = Harness::new();
    h.provider.fail_next_for(Op::Create, BACKUP, 1);

    assert_err!(h.controller.setup(setup_request(2, 3)).await);

    assert!(h.provider.records().is_empty());
    assert_eq!(h.provider.all_alias_creations(ALIAS), 0, "setup stops at the first failure");
}

#[tokio::test]
async fn state_write_failure_rolls_back_records() {
    let h = Harness::with_store(Arc::new(ReadOnlyStore(MemoryStateStore::new())));

    let err = assert_err!(h.controller.setup(setup_request(2, 3)).await);
    assert!(matches!(err, Error::StateStore(_)));
    assert!(h.provider.records().is_empty());
}

#[tokio::test]
async fn setup_twice_is_rejected() {
    let h = Harness::new();
    h.setup(2, 3).await;

    let err = assert_err!(h.controller.setup(setup_request(2, 3)).await);
    assert!(matches!(err, Error::AlreadyConfigured(alias) if alias == ALIAS));
    assert!(h.provider.calls().is_empty(), "rejected setup must not touch DNS");
}

#[tokio::test]
async fn invalid_setup_is_rejected_before_dns() {
    let h = Harness::new();
    let mut request = setup_request(2, 3);
    request.backup_record = "primary".to_string();

    let err = assert_err!(h.controller.setup(request).await);
    assert!(!err.is_retryable());
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn cleanup_removes_records_and_state() {
    let h = Harness::new();
    h.setup(2, 3).await;
    // A stray duplicate from an interrupted earlier run
    h.provider.insert(ALIAS, RecordType::Cname, BACKUP);

    assert_ok!(h.controller.cleanup().await);

    assert!(h.provider.records().is_empty());
    assert!(h.store.load().await.unwrap().is_none());
    assert!(matches!(h.controller.cleanup().await, Err(Error::ConfigMissing)));
}

#[tokio::test]
async fn cleanup_keeps_state_on_provider_failure() {
    let h = Harness::new();
    h.setup(2, 3).await;
    h.provider.fail_next(Op::Delete, 1);

    assert_err!(h.controller.cleanup().await);
    assert!(h.store.load().await.unwrap().is_some());

    // Retrying completes it
    assert_ok!(h.controller.cleanup().await);
    assert!(h.provider.records().is_empty());
}

#[tokio::test]
async fn cleanup_refused_while_monitor_runs() {
    let h = Harness::new();
    h.setup(2, 3).await;
    let pid = assert_ok!(h.controller.start_monitor().await);

    let err = assert_err!(h.controller.cleanup().await);
    assert!(matches!(err, Error::MonitorActive { pid: p } if p == pid));
    assert_eq!(h.provider.records().len(), 3);

    assert_ok!(h.controller.stop_monitor().await);
    assert_ok!(h.controller.cleanup().await);
}
