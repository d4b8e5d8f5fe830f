//! Failover state machine
//!
//! Pure hysteresis logic: given the persisted [`FailoverState`] and one probe
//! result for the primary backend, compute the next counters and whether a
//! transition should be requested.
//!
//! ```text
//!                 failures >= failure threshold
//!  STEADY_PRIMARY ─────────────────────────────▶ STEADY_BACKUP
//!        ▲                                            │
//!        └────────────────────────────────────────────┘
//!                 recoveries >= recovery threshold
//! ```
//!
//! A requested transition is not a fact. [`FailoverState::commit_transition`]
//! is only called once the reconciler has pointed the alias at the new side.
//! If reconciliation fails, the caller keeps the evaluated state, whose
//! counters still sit at (or above) the threshold, so the next tick requests
//! the transition again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::Health;

/// Which backend the alias currently points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Primary backend
    Primary,
    /// Backup backend
    Backup,
}

impl Side {
    /// The other side
    pub fn other(self) -> Side {
        match self {
            Side::Primary => Side::Backup,
            Side::Backup => Side::Primary,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Primary => f.write_str("PRIMARY"),
            Side::Backup => f.write_str("BACKUP"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Side::Primary),
            "backup" => Ok(Side::Backup),
            other => Err(crate::Error::invalid_input(format!(
                "Unknown side '{}'; expected primary or backup",
                other
            ))),
        }
    }
}

/// Consecutive-tick thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Unhealthy probes in a row before failing over to backup
    pub failure: u32,
    /// Healthy probes in a row before failing back to primary
    pub recovery: u32,
}

/// Mutable failover state, persisted after every tick
///
/// `consecutive_failures` and `consecutive_recoveries` are never both nonzero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverState {
    /// Side the alias points at
    pub active_side: Side,
    /// Unhealthy primary probes in a row while on primary
    pub consecutive_failures: u32,
    /// Healthy primary probes in a row while on backup
    pub consecutive_recoveries: u32,
    /// When `active_side` last changed (setup time initially)
    pub last_transition_timestamp: DateTime<Utc>,
}

/// Outcome of one evaluation tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// State with updated counters; `active_side` is unchanged
    pub next: FailoverState,
    /// Side to reconcile to, if a threshold was reached
    pub transition: Option<Side>,
}

impl FailoverState {
    /// Initial state created by setup
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            active_side: Side::Primary,
            consecutive_failures: 0,
            consecutive_recoveries: 0,
            last_transition_timestamp: now,
        }
    }

    /// Consume one probe result for the primary backend
    ///
    /// Emits at most one transition request. Counters are left at the
    /// threshold when a transition is requested; they are reset only by
    /// [`FailoverState::commit_transition`].
    pub fn evaluate(&self, primary: Health, thresholds: Thresholds) -> Evaluation {
        let mut next = self.clone();
        let mut transition = None;

        match primary {
            Health::Healthy => {
                next.consecutive_failures = 0;
                match self.active_side {
                    Side::Backup => {
                        next.consecutive_recoveries = self.consecutive_recoveries.saturating_add(1);
                        if next.consecutive_recoveries >= thresholds.recovery {
                            transition = Some(Side::Primary);
                        }
                    }
                    Side::Primary => next.consecutive_recoveries = 0,
                }
            }
            Health::Unhealthy(_) => {
                next.consecutive_recoveries = 0;
                match self.active_side {
                    Side::Primary => {
                        next.consecutive_failures = self.consecutive_failures.saturating_add(1);
                        if next.consecutive_failures >= thresholds.failure {
                            transition = Some(Side::Backup);
                        }
                    }
                    // Already on backup; no repeated failover attempts
                    Side::Backup => next.consecutive_failures = 0,
                }
            }
        }

        Evaluation { next, transition }
    }

    /// Record a completed reconciliation to `to`
    pub fn commit_transition(&mut self, to: Side, now: DateTime<Utc>) {
        self.active_side = to;
        self.consecutive_failures = 0;
        self.consecutive_recoveries = 0;
        self.last_transition_timestamp = now;
    }

    /// Whether the counter exclusivity invariant holds
    pub fn is_consistent(&self) -> bool {
        self.consecutive_failures == 0 || self.consecutive_recoveries == 0
    }
}
