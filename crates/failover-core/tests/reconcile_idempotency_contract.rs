//! Contract Test: Reconciliation Idempotency
//!
//! Constraints verified:
//! - Pointing the alias at the same target twice leaves exactly one CNAME
//! - Duplicate CNAMEs left behind by earlier runs are swept away
//! - A create failure after the delete surfaces as an error, and repeating
//!   the swap completes it
//! - Retryable provider errors are retried within one reconciliation;
//!   fatal ones are not
//!
//! If this test fails, someone has made the alias swap non-idempotent or
//! moved retries into the provider.

mod common;

use common::*;
use failover_core::config::ReconcileConfig;
use failover_core::{Error, RecordType, Reconciler};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn reconciler(provider: &RecordingProvider, max_retries: usize) -> Reconciler {
    let config = ReconcileConfig {
        max_retries,
        retry_delay_ms: 0,
        ..ReconcileConfig::default()
    };
    Reconciler::new(Arc::new(provider.clone()), &config)
}

#[tokio::test]
async fn pointing_twice_leaves_one_cname() {
    let provider = RecordingProvider::new();
    provider.insert(PRIMARY, RecordType::A, "192.0.2.10");
    provider.insert(BACKUP, RecordType::A, "192.0.2.20");
    provider.insert(ALIAS, RecordType::Cname, PRIMARY);
    let reconciler = reconciler(&provider, 0);

    let first = assert_ok!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);
    let second = assert_ok!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);

    assert_ne!(first.id, second.id, "each swap creates a fresh record");
    assert_eq!(provider.alias_target(ALIAS), BACKUP);
    assert_eq!(provider.records_named(ALIAS, RecordType::Cname)[0].id, second.id);

    // Host records are never touched by an alias swap
    assert_eq!(provider.records_named(PRIMARY, RecordType::A).len(), 1);
    assert_eq!(provider.records_named(BACKUP, RecordType::A).len(), 1);
}

#[tokio::test]
async fn duplicate_cnames_are_swept() {
    let provider = RecordingProvider::new();
    for _ in 0..3 {
        provider.insert(ALIAS, RecordType::Cname, PRIMARY);
    }
    let reconciler = reconciler(&provider, 0);

    assert_ok!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);

    assert_eq!(provider.alias_target(ALIAS), BACKUP);
    let deletes = provider
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Delete(_)))
        .count();
    assert_eq!(deletes, 3);
}

#[tokio::test]
async fn missing_alias_is_created() {
    let provider = RecordingProvider::new();
    let reconciler = reconciler(&provider, 0);

    assert_ok!(reconciler.point_alias_to(ALIAS, PRIMARY, 60).await);
    assert_eq!(provider.alias_target(ALIAS), PRIMARY);
}

#[tokio::test]
async fn create_failure_after_delete_is_reported_and_recoverable() {
    let provider = RecordingProvider::new();
    provider.insert(ALIAS, RecordType::Cname, PRIMARY);
    let reconciler = reconciler(&provider, 0);

    provider.fail_next_for(Op::Create, ALIAS, 1);
    let err = assert_err!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);
    assert!(matches!(err, Error::Provider { code: Some(10000), .. }));
    assert!(provider.records_named(ALIAS, RecordType::Cname).is_empty());

    assert_ok!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);
    assert_eq!(provider.alias_target(ALIAS), BACKUP);
}

#[tokio::test]
async fn retryable_errors_are_retried_within_one_swap() {
    let provider = RecordingProvider::new();
    provider.insert(ALIAS, RecordType::Cname, PRIMARY);
    let reconciler = reconciler(&provider, 2);

    provider.fail_next(Op::Find, 2);
    provider.fail_next_for(Op::Create, ALIAS, 1);
    assert_ok!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);

    assert_eq!(provider.alias_target(ALIAS), BACKUP);
    assert_eq!(provider.alias_creations(ALIAS, BACKUP), 2);
}

#[tokio::test]
async fn retries_are_bounded() {
    let provider = RecordingProvider::new();
    let reconciler = reconciler(&provider, 2);

    provider.fail_next(Op::Find, 10);
    assert_err!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);

    // One attempt plus two retries
    assert_eq!(provider.calls().len(), 3);
}

#[tokio::test]
async fn fatal_errors_are_not_retried() {
    let provider = RecordingProvider::new();
    let reconciler = reconciler(&provider, 5);

    provider.fail_next_fatal(Op::Find);
    let err = assert_err!(reconciler.point_alias_to(ALIAS, BACKUP, 60).await);
    assert!(!err.is_retryable());
    assert_eq!(provider.calls().len(), 1);
}
