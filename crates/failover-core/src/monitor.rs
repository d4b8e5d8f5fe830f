//! Monitor loop and supervisor
//!
//! The monitor drives the failover state machine on a fixed interval:
//!
//! ```text
//! ┌────────────┐  probe(primary)  ┌────────────┐  Transition?  ┌────────────┐
//! │  Monitor   │─────────────────▶│  Machine   │──────────────▶│ Reconciler │
//! └────────────┘                  └────────────┘               └────────────┘
//!       │                                                            │
//!       └──────────── compare_and_swap(state) ◀──────────────────────┘
//! ```
//!
//! ## Tick
//!
//! 1. Load the state document
//! 2. Probe the primary address (outside the mutation lock)
//! 3. Take the mutation lock and reload, so an operator action that landed
//!    during the probe is not overwritten
//! 4. Evaluate; if a transition is requested, point the alias at the new side
//! 5. Commit the transition only if reconciliation succeeded
//! 6. Write the whole document back with compare-and-swap
//!
//! ## Lifecycle
//!
//! [`Monitor::spawn`] claims the liveness marker and runs the loop on a tokio
//! task. [`MonitorHandle::stop`] is cooperative: the loop checks the stop
//! signal before each tick and before sleeping, and the sleep itself wakes on
//! stop. A tick in progress always runs to completion.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::liveness::LivenessMarker;
use crate::lock::MutationLock;
use crate::machine::{FailoverState, Side};
use crate::probe::{Health, HealthProber};
use crate::reconciler::Reconciler;
use crate::traits::{StateDocument, StateStore};

/// Events emitted by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Loop started
    Started {
        /// Alias being monitored
        alias: String,
    },

    /// A threshold was reached and a transition will be attempted
    TransitionRequested {
        /// Side the alias should move to
        to: Side,
    },

    /// The alias now points at the new side and state was updated
    TransitionCommitted {
        /// Previous side
        from: Side,
        /// New side
        to: Side,
    },

    /// Reconciliation failed; the active side is unchanged
    TransitionFailed {
        /// Side that was requested
        to: Side,
        /// Error message
        error: String,
    },

    /// One tick finished and its state was persisted
    TickCompleted {
        /// Probe result for the primary
        health: Health,
        /// State as written
        state: FailoverState,
    },

    /// A tick could not complete (load, lock, or write failed)
    TickFailed {
        /// Error message
        error: String,
    },

    /// Loop exited
    Stopped {
        /// Why the loop exited
        reason: String,
    },
}

/// Result of one successful tick
#[derive(Debug)]
pub struct TickReport {
    /// Probe result for the primary
    pub health: Health,
    /// Transition requested by the state machine, if any
    pub requested: Option<Side>,
    /// Whether the requested transition was committed
    pub committed: bool,
    /// Reconciliation failure, if the requested transition was not committed
    pub reconcile_error: Option<Error>,
    /// Document as written by this tick
    pub document: StateDocument,
}

/// Failover monitor
pub struct Monitor {
    store: Arc<dyn StateStore>,
    prober: Arc<dyn HealthProber>,
    reconciler: Arc<Reconciler>,
    lock: MutationLock,
    /// Sleep used after a failed tick, when no interval could be read
    fallback_interval: Duration,
    event_tx: Option<mpsc::Sender<MonitorEvent>>,
}

impl Monitor {
    /// Create a monitor
    pub fn new(
        store: Arc<dyn StateStore>,
        prober: Arc<dyn HealthProber>,
        reconciler: Arc<Reconciler>,
        lock: MutationLock,
        fallback_interval: Duration,
    ) -> Self {
        Self {
            store,
            prober,
            reconciler,
            lock,
            fallback_interval,
            event_tx: None,
        }
    }

    /// Attach a bounded event channel
    ///
    /// Events are dropped (with a warning) when the receiver falls behind;
    /// the loop never waits on a slow consumer.
    pub fn with_events(mut self, capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.event_tx = Some(tx);
        (self, rx)
    }

    /// Send events to an existing channel
    pub fn forward_events(mut self, tx: mpsc::Sender<MonitorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run one tick
    ///
    /// A failed reconciliation is not an error here: it is reported in the
    /// [`TickReport`] and the evaluated counters are still persisted, so the
    /// next tick requests the transition again.
    pub async fn tick(&self) -> Result<TickReport> {
        let snapshot = self.store.load().await?.ok_or(Error::ConfigMissing)?;
        let health = self.prober.probe(snapshot.config.primary_ip).await;
        debug!(alias = %snapshot.config.alias, %health, "Primary probed");

        let _guard = self.lock.acquire().await?;
        let current = self.store.load().await?.ok_or(Error::ConfigMissing)?;
        let config = &current.config;

        let evaluation = current.state.evaluate(health.clone(), config.thresholds());
        let mut next = current.clone();
        next.state = evaluation.next;

        let mut committed = false;
        let mut reconcile_error = None;

        if let Some(to) = evaluation.transition {
            let from = current.state.active_side;
            warn!(
                alias = %config.alias,
                %from,
                %to,
                failures = next.state.consecutive_failures,
                recoveries = next.state.consecutive_recoveries,
                "Threshold reached; switching"
            );
            self.emit_event(MonitorEvent::TransitionRequested { to });

            match self
                .reconciler
                .point_alias_to(&config.alias, config.record_for(to), config.ttl)
                .await
            {
                Ok(alias_record) => {
                    next.state.commit_transition(to, Utc::now());
                    next.records.alias = alias_record;
                    committed = true;
                    info!(alias = %config.alias, %from, %to, "Failover transition committed");
                    self.emit_event(MonitorEvent::TransitionCommitted { from, to });
                }
                Err(e) => {
                    error!(alias = %config.alias, %to, error = %e, "Reconciliation failed; active side unchanged");
                    self.emit_event(MonitorEvent::TransitionFailed {
                        to,
                        error: e.to_string(),
                    });
                    reconcile_error = Some(e);
                }
            }
        }

        let document = self
            .store
            .compare_and_swap(Some(current.revision), next)
            .await
            .inspect_err(|e| {
                if committed {
                    error!(
                        alias = %config.alias,
                        error = %e,
                        "Alias switched but state not written; next status will show drift"
                    );
                }
            })?;

        self.emit_event(MonitorEvent::TickCompleted {
            health: health.clone(),
            state: document.state.clone(),
        });

        Ok(TickReport {
            health,
            requested: evaluation.transition,
            committed,
            reconcile_error,
            document,
        })
    }

    /// Run ticks until `stop` turns true
    ///
    /// Returns `Err` only when setup has been removed underneath the loop;
    /// every other failure is logged and retried on the next tick.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let alias = match self.store.load().await {
            Ok(Some(doc)) => doc.config.alias,
            _ => String::new(),
        };
        info!(alias = %alias, "Monitor started");
        self.emit_event(MonitorEvent::Started { alias });

        let mut interval = self.fallback_interval;
        let result = loop {
            if *stop.borrow() {
                break Ok(());
            }

            match self.tick().await {
                Ok(report) => interval = report.document.config.check_interval(),
                Err(Error::ConfigMissing) => {
                    error!("State document disappeared; monitor exiting");
                    break Err(Error::ConfigMissing);
                }
                Err(e) => {
                    error!(error = %e, "Monitor tick failed");
                    self.emit_event(MonitorEvent::TickFailed {
                        error: e.to_string(),
                    });
                }
            }

            if *stop.borrow() {
                break Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    // A dropped sender also means stop
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        let reason = match &result {
            Ok(()) => "Stop requested".to_string(),
            Err(e) => e.to_string(),
        };
        info!(reason = %reason, "Monitor stopped");
        self.emit_event(MonitorEvent::Stopped { reason });
        result
    }

    /// Claim the liveness marker and run the loop on a background task
    ///
    /// Fails with [`Error::ConcurrentStartRejected`] while another live
    /// monitor holds the marker.
    pub async fn spawn(self: Arc<Self>, marker: LivenessMarker) -> Result<MonitorHandle> {
        let pid = std::process::id();
        marker.claim(pid).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = self.clone();
        let task = tokio::spawn(async move { monitor.run(stop_rx).await });

        Ok(MonitorHandle {
            stop_tx,
            task,
            marker,
            pid,
        })
    }

    /// Emit a monitor event
    fn emit_event(&self, event: MonitorEvent) {
        if let Some(tx) = &self.event_tx
            && tx.try_send(event).is_err()
        {
            warn!("Monitor event channel full or closed, dropping event");
        }
    }
}

/// Handle to a spawned monitor
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
    marker: LivenessMarker,
    pid: u32,
}

impl MonitorHandle {
    /// Pid recorded in the liveness marker
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the loop task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop, wait for its current tick to finish, release the marker
    pub async fn stop(self) -> Result<()> {
        // Err means the loop already exited and dropped its receiver
        let _ = self.stop_tx.send(true);
        self.finish().await
    }

    /// Wait for the loop to exit on its own, then release the marker
    pub async fn wait(self) -> Result<()> {
        self.finish().await
    }

    async fn finish(self) -> Result<()> {
        let outcome = self.task.await;
        if let Err(e) = self.marker.release(self.pid).await {
            warn!(error = %e, "Failed to remove liveness marker");
        }

        match outcome {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("Monitor task failed: {}", e))),
        }
    }
}
