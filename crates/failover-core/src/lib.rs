// # failover-core
//
// Core library for DNS-based failover between a primary and a backup host.
//
// ## Architecture Overview
//
// A public alias (CNAME) points at one of two host records. The library keeps
// it pointed at whichever side is healthy:
// - **DnsProvider**: Trait for finding, creating and deleting DNS records
// - **Reconciler**: Swaps the alias target and builds/tears down the topology
// - **HealthProber**: Layered ICMP → HTTP → TCP reachability check
// - **FailoverState**: Hysteresis state machine (consecutive-tick thresholds)
// - **StateStore**: Whole-document persistence with compare-and-swap
// - **Monitor**: Interval loop tying probe, state machine and reconciler together
// - **FailoverController**: Setup, start/stop, switch, status and cleanup
// - **ProviderRegistry**: Plugin-based registry for DNS providers
//
// ## Design Principles
//
// 1. **Transitions are requests**: the active side only changes after the
//    provider confirmed the new alias record
// 2. **Single writer**: every mutation holds the mutation lock across
//    load → reconcile → write, and writes are compare-and-swap
// 3. **Crash safe**: state is written atomically after every tick, so a
//    restarted monitor resumes exactly where the last one stopped
// 4. **Library-First**: the operator binary only parses input and calls the
//    controller

pub mod config;
pub mod controller;
pub mod error;
pub mod liveness;
pub mod lock;
pub mod machine;
pub mod monitor;
pub mod probe;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{ControllerConfig, FailoverConfig, ProviderConfig};
pub use controller::{FailoverController, SetupRequest, StatusReport, SwitchReport};
pub use error::{Error, ErrorClass, Result};
pub use liveness::LivenessMarker;
pub use lock::MutationLock;
pub use machine::{FailoverState, Side, Thresholds};
pub use monitor::{Monitor, MonitorEvent, MonitorHandle, TickReport};
pub use probe::{Health, HealthProber, LayeredProber};
pub use reconciler::Reconciler;
pub use registry::ProviderRegistry;
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{DnsProvider, DnsRecordRef, RecordType, StateDocument, StateStore};
