//! Core traits for the failover controller
//!
//! This module defines the abstract interfaces that implementations follow.
//!
//! - [`DnsProvider`]: Find, create and delete DNS records via a provider API
//! - [`StateStore`]: Whole-document persistence with compare-and-swap
//!
//! The health prober trait lives next to its implementation in
//! [`crate::probe`].

pub mod dns_provider;
pub mod state_store;

pub use dns_provider::{DnsProvider, DnsProviderFactory, DnsRecordRef, RecordType};
pub use state_store::{ManagedRecords, StateDocument, StateStore, STATE_FORMAT_VERSION};
