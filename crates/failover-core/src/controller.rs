//! Controller facade
//!
//! The operations an operator-facing front end calls: setup, start/stop of
//! the monitor, manual switch, status, cleanup. Each one is self-contained;
//! the controller knows nothing about how it is invoked.
//!
//! Every operation that mutates the state document holds the
//! [`MutationLock`] for its whole load → reconcile → write sequence.

use chrono::Utc;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::config::{ControllerConfig, FailoverConfig};
use crate::error::{Error, Result};
use crate::liveness::LivenessMarker;
use crate::lock::MutationLock;
use crate::machine::Side;
use crate::monitor::{Monitor, MonitorEvent, MonitorHandle};
use crate::probe::{Health, HealthProber, LayeredProber};
use crate::reconciler::Reconciler;
use crate::registry::ProviderRegistry;
use crate::state::FileStateStore;
use crate::traits::{DnsProvider, RecordType, StateDocument, StateStore};

/// How often [`FailoverController::wait_monitor`] checks the loop task
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Input to [`FailoverController::setup`]
///
/// Names may be bare labels; they are qualified against the base domain.
/// Unset tuning values fall back to the controller's setup defaults.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub alias: String,
    pub primary_record: String,
    pub primary_ip: IpAddr,
    pub backup_record: String,
    pub backup_ip: IpAddr,
    pub interval_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub recovery_threshold: Option<u32>,
    pub ttl: Option<u32>,
}

/// Result of a manual switch
#[derive(Debug, Clone, Serialize)]
pub struct SwitchReport {
    pub from: Side,
    pub to: Side,
    pub document: StateDocument,
}

/// Snapshot returned by [`FailoverController::status`]
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub document: StateDocument,
    /// Pid of the live monitor, if any
    pub monitor_pid: Option<u32>,
    pub primary_health: Health,
    pub backup_health: Health,
    /// Target of the alias CNAME as the provider reports it now
    pub live_alias_target: Option<String>,
    /// Side matching `live_alias_target`
    pub live_side: Option<Side>,
}

impl StatusReport {
    /// Whether live DNS disagrees with the recorded active side
    pub fn is_drifted(&self) -> bool {
        self.live_alias_target.is_some() && self.live_side != Some(self.document.state.active_side)
    }
}

/// Failover controller
pub struct FailoverController {
    config: ControllerConfig,
    store: Arc<dyn StateStore>,
    prober: Arc<dyn HealthProber>,
    reconciler: Arc<Reconciler>,
    lock: MutationLock,
    marker: LivenessMarker,
    monitor: Mutex<Option<MonitorHandle>>,
    event_tx: Option<mpsc::Sender<MonitorEvent>>,
}

impl FailoverController {
    /// Create a controller from explicit components
    ///
    /// The liveness marker is placed next to `config.state_path`.
    pub fn new(
        config: ControllerConfig,
        provider: Arc<dyn DnsProvider>,
        store: Arc<dyn StateStore>,
        prober: Arc<dyn HealthProber>,
        lock: MutationLock,
    ) -> Result<Self> {
        config.validate()?;

        let reconciler = Arc::new(Reconciler::new(provider, &config.reconcile));
        let marker = LivenessMarker::new(config.marker_path());

        Ok(Self {
            config,
            store,
            prober,
            reconciler,
            lock,
            marker,
            monitor: Mutex::new(None),
            event_tx: None,
        })
    }

    /// Create a controller with the file state store, the layered prober,
    /// the file mutation lock and a provider taken from `registry`
    pub async fn from_config(config: ControllerConfig, registry: &ProviderRegistry) -> Result<Self> {
        config.validate()?;

        let provider: Arc<dyn DnsProvider> = Arc::from(registry.create_provider(&config)?);
        let store = Arc::new(FileStateStore::new(&config.state_path).await?);
        let prober = Arc::new(LayeredProber::from_config(&config.probe));
        let lock = MutationLock::file(
            config.lock_path(),
            config.lock.acquire_timeout(),
            config.lock.stale_after(),
        );

        Self::new(config, provider, store, prober, lock)
    }

    /// Forward events of monitors started by this controller
    pub fn with_monitor_events(mut self, capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.event_tx = Some(tx);
        (self, rx)
    }

    /// Controller configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Create the DNS topology and the initial state document
    ///
    /// Rejected with [`Error::AlreadyConfigured`] when a document exists. If
    /// the document cannot be written, the created records are rolled back.
    pub async fn setup(&self, request: SetupRequest) -> Result<StateDocument> {
        let defaults = &self.config.defaults;
        let failover = FailoverConfig {
            alias: self.config.qualify(&request.alias),
            primary_record: self.config.qualify(&request.primary_record),
            backup_record: self.config.qualify(&request.backup_record),
            primary_ip: request.primary_ip,
            backup_ip: request.backup_ip,
            check_interval_secs: request.interval_secs.unwrap_or(defaults.interval_secs),
            failure_threshold: request.failure_threshold.unwrap_or(defaults.failure_threshold),
            recovery_threshold: request.recovery_threshold.unwrap_or(defaults.recovery_threshold),
            ttl: request.ttl.unwrap_or(defaults.ttl),
        };
        failover.validate()?;

        let _guard = self.lock.acquire().await?;
        if let Some(existing) = self.store.load().await? {
            return Err(Error::AlreadyConfigured(existing.config.alias));
        }

        info!(
            alias = %failover.alias,
            primary = %failover.primary_record,
            backup = %failover.backup_record,
            "Setting up failover"
        );

        let records = self
            .reconciler
            .create_initial_topology(
                &failover.alias,
                &failover.primary_record,
                failover.primary_ip,
                &failover.backup_record,
                failover.backup_ip,
                failover.ttl,
            )
            .await?;

        let document = StateDocument::new(failover, records.clone(), Utc::now());
        match self.store.compare_and_swap(None, document).await {
            Ok(stored) => {
                info!(alias = %stored.config.alias, "Failover configured; alias points at primary");
                Ok(stored)
            }
            Err(e) => {
                error!(error = %e, "Failed to persist initial state; rolling back records");
                self.reconciler
                    .rollback(&[records.primary, records.backup, records.alias])
                    .await;
                Err(e)
            }
        }
    }

    /// Start the monitor on a background task
    ///
    /// Returns the pid recorded in the liveness marker. Fails with
    /// [`Error::ConfigMissing`] before setup and with
    /// [`Error::ConcurrentStartRejected`] while a monitor is alive.
    pub async fn start_monitor(&self) -> Result<u32> {
        let document = self.store.load().await?.ok_or(Error::ConfigMissing)?;

        let mut slot = self.monitor.lock().await;
        if let Some(handle) = slot.as_ref()
            && handle.is_running()
        {
            return Err(Error::ConcurrentStartRejected { pid: handle.pid() });
        }
        // A finished loop still owns its marker until joined
        if let Some(finished) = slot.take()
            && let Err(e) = finished.wait().await
        {
            warn!(error = %e, "Previous monitor exited with an error");
        }

        let monitor = Monitor::new(
            self.store.clone(),
            self.prober.clone(),
            self.reconciler.clone(),
            self.lock.clone(),
            Duration::from_secs(self.config.defaults.interval_secs.max(1)),
        );
        let monitor = match &self.event_tx {
            Some(tx) => monitor.forward_events(tx.clone()),
            None => monitor,
        };

        let handle = Arc::new(monitor).spawn(self.marker.clone()).await?;
        let pid = handle.pid();
        info!(alias = %document.config.alias, pid, "Monitor started");
        *slot = Some(handle);
        Ok(pid)
    }

    /// Stop a monitor started by this controller
    ///
    /// Returns `false` when this controller has no monitor. A monitor in
    /// another process is stopped by signalling the pid in the marker.
    pub async fn stop_monitor(&self) -> Result<bool> {
        let Some(handle) = self.monitor.lock().await.take() else {
            return Ok(false);
        };
        handle.stop().await?;
        info!("Monitor stopped");
        Ok(true)
    }

    /// Wait until the monitor started by this controller exits on its own
    ///
    /// Cancel-safe: dropping the future leaves a running monitor in place, so
    /// [`FailoverController::stop_monitor`] still finds it.
    pub async fn wait_monitor(&self) -> Result<()> {
        loop {
            {
                let mut slot = self.monitor.lock().await;
                match slot.as_ref().map(MonitorHandle::is_running) {
                    None => return Ok(()),
                    Some(false) => {
                        if let Some(handle) = slot.take() {
                            return handle.wait().await;
                        }
                    }
                    Some(true) => {}
                }
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Pid of a live monitor, in this process or any other
    pub async fn monitor_pid(&self) -> Result<Option<u32>> {
        if let Some(handle) = self.monitor.lock().await.as_ref()
            && handle.is_running()
        {
            return Ok(Some(handle.pid()));
        }
        self.marker.live_pid().await
    }

    /// Point the alias at `to` (default: the side not currently active)
    ///
    /// Switching to the side already active repairs the alias record and
    /// resets the counters.
    pub async fn manual_switch(&self, to: Option<Side>) -> Result<SwitchReport> {
        let _guard = self.lock.acquire().await?;
        let current = self.store.load().await?.ok_or(Error::ConfigMissing)?;
        let config = &current.config;

        let from = current.state.active_side;
        let to = to.unwrap_or(from.other());
        if from == to {
            info!(alias = %config.alias, side = %to, "Re-applying active side");
        } else {
            info!(alias = %config.alias, %from, %to, "Manual switch");
        }

        let alias_record = self
            .reconciler
            .point_alias_to(&config.alias, config.record_for(to), config.ttl)
            .await?;

        let mut next = current.clone();
        next.state.commit_transition(to, Utc::now());
        next.records.alias = alias_record;

        let document = self
            .store
            .compare_and_swap(Some(current.revision), next)
            .await
            .inspect_err(|e| {
                error!(error = %e, "Alias switched but state not written; next status will show drift");
            })?;

        Ok(SwitchReport { from, to, document })
    }

    /// Read state, probe both sides once and read the live alias target
    pub async fn status(&self) -> Result<StatusReport> {
        let document = self.store.load().await?.ok_or(Error::ConfigMissing)?;
        let monitor_pid = self.monitor_pid().await?;

        let (primary_health, backup_health) = tokio::join!(
            self.prober.probe(document.config.primary_ip),
            self.prober.probe(document.config.backup_ip),
        );

        let live_alias_target = match self
            .reconciler
            .provider()
            .find_record(&document.config.alias, RecordType::Cname)
            .await
        {
            Ok(record) => record.map(|r| r.content.trim_end_matches('.').to_string()),
            Err(e) => {
                warn!(error = %e, "Could not read live alias record");
                None
            }
        };
        let live_side = live_alias_target
            .as_deref()
            .and_then(|target| document.side_for_target(target));

        Ok(StatusReport {
            document,
            monitor_pid,
            primary_health,
            backup_health,
            live_alias_target,
            live_side,
        })
    }

    /// Delete the managed records and the state document
    ///
    /// Refused with [`Error::MonitorActive`] while a monitor is alive. A
    /// provider failure aborts cleanup and leaves the state document in place
    /// so cleanup can be retried.
    pub async fn cleanup(&self) -> Result<()> {
        if let Some(pid) = self.monitor_pid().await? {
            return Err(Error::MonitorActive { pid });
        }

        let _guard = self.lock.acquire().await?;
        let document = self.store.load().await?.ok_or(Error::ConfigMissing)?;

        self.reconciler.remove_topology(&document.records).await?;
        self.store.delete().await?;

        info!(alias = %document.config.alias, "Failover configuration removed");
        Ok(())
    }
}
