//! Contract Test: Manual Switch and Status
//!
//! Constraints verified:
//! - A manual switch goes through the same reconciliation as the monitor and
//!   commits only after DNS changed
//! - Switching to the active side repairs a missing alias record
//! - A manual switch racing a monitor tick leaves DNS and state agreeing
//! - Status reports both sides' health and the live alias target, and flags
//!   drift between DNS and state

mod common;

use common::*;
use failover_core::machine::Side;
use failover_core::{Error, RecordType};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn switch_defaults_to_the_other_side() {
    let h = Harness::new();
    h.setup(2, 3).await;
    h.prober.push([down()]);
    assert_ok!(h.monitor.tick().await);
    let before = h.document().await;
    assert_eq!(before.state.consecutive_failures, 1);

    let report = assert_ok!(h.controller.manual_switch(None).await);

    assert_eq!(report.from, Side::Primary);
    assert_eq!(report.to, Side::Backup);
    assert_eq!(report.document.revision, before.revision + 1);
    assert_eq!(report.document.state.active_side, Side::Backup);
    assert_eq!(report.document.state.consecutive_failures, 0, "counters reset on switch");
    assert!(report.document.state.last_transition_timestamp > before.state.last_transition_timestamp);
    assert_eq!(h.provider.alias_target(ALIAS), BACKUP);
}

#[tokio::test]
async fn switch_to_active_side_repairs_alias() {
    let h = Harness::new();
    h.setup(2, 3).await;
    h.provider.remove(ALIAS, RecordType::Cname);

    let report = assert_ok!(h.controller.manual_switch(Some(Side::Primary)).await);

    assert_eq!(report.from, Side::Primary);
    assert_eq!(report.to, Side::Primary);
    assert_eq!(h.provider.alias_target(ALIAS), PRIMARY);
    assert_eq!(
        report.document.records.alias.id,
        h.provider.records_named(ALIAS, RecordType::Cname)[0].id
    );
}

#[tokio::test]
async fn failed_switch_leaves_state_unchanged() {
    let h = Harness::new();
    h.setup(2, 3).await;
    let before = h.document().await;

    h.provider.fail_next_for(Op::Create, ALIAS, 1);
    assert_err!(h.controller.manual_switch(Some(Side::Backup)).await);

    assert_eq!(h.document().await, before);
}

#[tokio::test]
async fn switch_requires_setup() {
    let h = Harness::new();
    let err = assert_err!(h.controller.manual_switch(None).await);
    assert!(matches!(err, Error::ConfigMissing));
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn switch_racing_a_tick_stays_consistent() {
    let h = Harness::new();
    h.setup(1, 1).await;
    h.prober.push([down()]);
    h.provider.set_create_delay(Duration::from_millis(50));

    // Tick wants BACKUP, operator wants PRIMARY; the lock serializes them
    let (tick, switch) = tokio::join!(
        h.monitor.tick(),
        h.controller.manual_switch(Some(Side::Primary))
    );
    assert_ok!(tick);
    assert_ok!(switch);

    let doc = h.document().await;
    assert_eq!(h.provider.alias_target(ALIAS), doc.active_target());
    assert_eq!(doc.records.alias.content, doc.active_target());
}

#[tokio::test]
async fn status_reports_health_and_live_target() {
    let h = Harness::new();
    h.setup(2, 3).await;
    h.prober.push([up(), down()]);

    let status = assert_ok!(h.controller.status().await);

    assert_eq!(status.primary_health, up());
    assert_eq!(status.backup_health, down());
    assert_eq!(status.live_alias_target.as_deref(), Some(PRIMARY));
    assert_eq!(status.live_side, Some(Side::Primary));
    assert_eq!(status.monitor_pid, None);
    assert!(!status.is_drifted());
    assert_eq!(h.prober.probed(), vec![primary_ip(), backup_ip()]);
}

#[tokio::test]
async fn status_flags_drift() {
    let h = Harness::new();
    h.setup(2, 3).await;
    // Someone repointed the alias outside the controller
    h.provider.remove(ALIAS, RecordType::Cname);
    h.provider.insert(ALIAS, RecordType::Cname, &format!("{BACKUP}."));

    let status = assert_ok!(h.controller.status().await);
    assert_eq!(status.live_side, Some(Side::Backup));
    assert!(status.is_drifted());
}

#[tokio::test]
async fn status_survives_provider_failure() {
    let h = Harness::new();
    h.setup(2, 3).await;
    h.provider.fail_next(Op::Find, 1);

    let status = assert_ok!(h.controller.status().await);
    assert_eq!(status.live_alias_target, None);
    assert!(!status.is_drifted());
}
