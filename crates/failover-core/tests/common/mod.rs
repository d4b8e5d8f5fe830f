//! Test doubles and common utilities for contract tests
//!
//! - [`RecordingProvider`]: in-memory record store with a call log, failure
//!   injection and optional latency
//! - [`ScriptedProber`]: returns a scripted sequence of health results
//! - [`Harness`]: controller + monitor wired to the doubles and a memory store

#![allow(dead_code)]

use async_trait::async_trait;
use failover_core::config::{ControllerConfig, ProviderConfig};
use failover_core::error::{Error, Result};
use failover_core::probe::{Health, HealthProber, ProbeFailure};
use failover_core::traits::{DnsProvider, DnsRecordRef, RecordType, StateStore};
use failover_core::{FailoverController, MemoryStateStore, Monitor, MutationLock, Reconciler, SetupRequest};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const ALIAS: &str = "app.example.com";
pub const PRIMARY: &str = "primary.example.com";
pub const BACKUP: &str = "backup.example.com";

pub fn primary_ip() -> IpAddr {
    IpAddr::from([192, 0, 2, 10])
}

pub fn backup_ip() -> IpAddr {
    IpAddr::from([192, 0, 2, 20])
}

/// One provider call, as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find(String, RecordType),
    Create(String, RecordType, String),
    Delete(String),
}

/// Provider operation selector for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Find,
    Create,
    Delete,
}

struct Injected {
    op: Op,
    /// Only calls touching this name (None: any)
    name: Option<String>,
    remaining: usize,
    fatal: bool,
}

#[derive(Default)]
struct ProviderInner {
    records: Mutex<Vec<DnsRecordRef>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<Injected>>,
    create_delay: Mutex<Option<Duration>>,
    next_id: AtomicUsize,
}

/// In-memory provider; clones share records and call log
#[derive(Clone, Default)]
pub struct RecordingProvider {
    inner: Arc<ProviderInner>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without logging a call
    pub fn insert(&self, name: &str, record_type: RecordType, content: &str) -> DnsRecordRef {
        let record = DnsRecordRef {
            name: name.to_string(),
            record_type,
            id: self.allocate_id(),
            content: content.to_string(),
        };
        self.inner.records.lock().unwrap().push(record.clone());
        record
    }

    /// Remove a record without logging a call (out-of-band tampering)
    pub fn remove(&self, name: &str, record_type: RecordType) {
        self.inner
            .records
            .lock()
            .unwrap()
            .retain(|r| !(r.name == name && r.record_type == record_type));
    }

    pub fn records(&self) -> Vec<DnsRecordRef> {
        self.inner.records.lock().unwrap().clone()
    }

    pub fn records_named(&self, name: &str, record_type: RecordType) -> Vec<DnsRecordRef> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name && r.record_type == record_type)
            .collect()
    }

    /// Content of the only CNAME for `name`; panics on zero or duplicates
    pub fn alias_target(&self, name: &str) -> String {
        let cnames = self.records_named(name, RecordType::Cname);
        assert_eq!(cnames.len(), 1, "expected exactly one CNAME for {name}, got {cnames:?}");
        cnames[0].content.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().unwrap().clear();
    }

    /// Number of CNAME creations for `alias` pointing at `target`
    pub fn alias_creations(&self, alias: &str, target: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(c, Call::Create(name, RecordType::Cname, content)
                    if name == alias && content == target)
            })
            .count()
    }

    /// Number of CNAME creations for `alias`, any target
    pub fn all_alias_creations(&self, alias: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(name, RecordType::Cname, _) if name == alias))
            .count()
    }

    /// Fail the next `times` calls of `op` with a retryable provider error
    pub fn fail_next(&self, op: Op, times: usize) {
        self.inject(op, None, times, false);
    }

    /// Fail the next `times` calls of `op` touching `name`
    pub fn fail_next_for(&self, op: Op, name: &str, times: usize) {
        self.inject(op, Some(name.to_string()), times, false);
    }

    /// Fail the next call of `op` with a non-retryable error
    pub fn fail_next_fatal(&self, op: Op) {
        self.inject(op, None, 1, true);
    }

    /// Delay every create by `delay`
    pub fn set_create_delay(&self, delay: Duration) {
        *self.inner.create_delay.lock().unwrap() = Some(delay);
    }

    fn inject(&self, op: Op, name: Option<String>, times: usize, fatal: bool) {
        self.inner.failures.lock().unwrap().push(Injected {
            op,
            name,
            remaining: times,
            fatal,
        });
    }

    fn take_failure(&self, op: Op, name: Option<&str>) -> Option<Error> {
        let mut failures = self.inner.failures.lock().unwrap();
        let slot = failures.iter_mut().find(|f| {
            f.op == op
                && f.remaining > 0
                && match (&f.name, name) {
                    (None, _) => true,
                    (Some(want), Some(got)) => want == got,
                    (Some(_), None) => false,
                }
        })?;
        slot.remaining -= 1;
        Some(if slot.fatal {
            Error::invalid_input("injected fatal failure")
        } else {
            Error::provider_code("recording", 10000, "injected failure")
        })
    }

    fn allocate_id(&self) -> String {
        format!("rec-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn log(&self, call: Call) {
        self.inner.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DnsProvider for RecordingProvider {
    async fn find_record(&self, name: &str, record_type: RecordType) -> Result<Option<DnsRecordRef>> {
        self.log(Call::Find(name.to_string(), record_type));
        if let Some(e) = self.take_failure(Op::Find, Some(name)) {
            return Err(e);
        }
        Ok(self.records_named(name, record_type).into_iter().next())
    }

    async fn create_record(
        &self,
        name: &str,
        record_type: RecordType,
        content: &str,
        _ttl: u32,
    ) -> Result<DnsRecordRef> {
        self.log(Call::Create(name.to_string(), record_type, content.to_string()));
        let delay = *self.inner.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.take_failure(Op::Create, Some(name)) {
            return Err(e);
        }
        Ok(self.insert(name, record_type, content))
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        self.log(Call::Delete(id.to_string()));
        let name = self
            .records()
            .into_iter()
            .find(|r| r.id == id)
            .map(|r| r.name);
        if let Some(e) = self.take_failure(Op::Delete, name.as_deref()) {
            return Err(e);
        }
        self.inner.records.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "recording"
    }
}

/// Prober returning scripted results; healthy once the script runs out
#[derive(Clone, Default)]
pub struct ScriptedProber {
    script: Arc<Mutex<VecDeque<Health>>>,
    probed: Arc<Mutex<Vec<IpAddr>>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, results: impl IntoIterator<Item = Health>) {
        self.script.lock().unwrap().extend(results);
    }

    pub fn probed(&self) -> Vec<IpAddr> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, address: IpAddr) -> Health {
        self.probed.lock().unwrap().push(address);
        self.script.lock().unwrap().pop_front().unwrap_or(Health::Healthy)
    }
}

pub fn up() -> Health {
    Health::Healthy
}

pub fn down() -> Health {
    Health::Unhealthy(ProbeFailure::Inconclusive)
}

/// Controller configuration rooted in `dir`, with instant retries
pub fn controller_config(dir: &Path) -> ControllerConfig {
    let mut config = ControllerConfig::new(
        ProviderConfig::Custom {
            factory: "recording".to_string(),
            config: serde_json::json!({}),
        },
        "example.com",
    );
    config.state_path = dir.join("state.json");
    config.reconcile.max_retries = 0;
    config.reconcile.retry_delay_ms = 0;
    config
}

/// Setup request with bare labels (qualified by the controller)
pub fn setup_request(failure_threshold: u32, recovery_threshold: u32) -> SetupRequest {
    SetupRequest {
        alias: "app".to_string(),
        primary_record: "primary".to_string(),
        primary_ip: primary_ip(),
        backup_record: "backup".to_string(),
        backup_ip: backup_ip(),
        interval_secs: Some(5),
        failure_threshold: Some(failure_threshold),
        recovery_threshold: Some(recovery_threshold),
        ttl: Some(60),
    }
}

fn new_monitor(
    provider: &RecordingProvider,
    prober: &ScriptedProber,
    store: &Arc<dyn StateStore>,
    lock: &MutationLock,
    config: &ControllerConfig,
) -> Monitor {
    Monitor::new(
        store.clone(),
        Arc::new(prober.clone()),
        Arc::new(Reconciler::new(Arc::new(provider.clone()), &config.reconcile)),
        lock.clone(),
        Duration::from_secs(1),
    )
}

/// Controller and monitor sharing one provider, prober, store and lock
pub struct Harness {
    pub controller: FailoverController,
    pub monitor: Monitor,
    pub provider: RecordingProvider,
    pub prober: ScriptedProber,
    pub store: Arc<dyn StateStore>,
    pub lock: MutationLock,
    pub config: ControllerConfig,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStateStore::new()))
    }

    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::build(dir, store, |_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut ControllerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::build(dir, Arc::new(MemoryStateStore::new()), tweak)
    }

    pub fn build(
        dir: TempDir,
        store: Arc<dyn StateStore>,
        tweak: impl FnOnce(&mut ControllerConfig),
    ) -> Self {
        let mut config = controller_config(dir.path());
        tweak(&mut config);

        let provider = RecordingProvider::new();
        let prober = ScriptedProber::new();
        let lock = MutationLock::in_process();

        let controller = FailoverController::new(
            config.clone(),
            Arc::new(provider.clone()),
            store.clone(),
            Arc::new(prober.clone()),
            lock.clone(),
        )
        .unwrap();

        let monitor = new_monitor(&provider, &prober, &store, &lock, &config);

        Self {
            controller,
            monitor,
            provider,
            prober,
            store,
            lock,
            config,
            dir,
        }
    }

    /// Another monitor over the same doubles, store and lock
    pub fn new_monitor(&self) -> Monitor {
        new_monitor(&self.provider, &self.prober, &self.store, &self.lock, &self.config)
    }

    /// Run setup and forget the calls it made
    pub async fn setup(&self, failure_threshold: u32, recovery_threshold: u32) {
        self.controller
            .setup(setup_request(failure_threshold, recovery_threshold))
            .await
            .unwrap();
        self.provider.clear_calls();
    }

    pub async fn document(&self) -> failover_core::StateDocument {
        self.store.load().await.unwrap().expect("state document exists")
    }
}
