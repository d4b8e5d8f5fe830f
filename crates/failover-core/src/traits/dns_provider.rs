// # DNS Provider Trait
//
// Defines the record-store interface the controller needs from a DNS provider:
// find, create and delete a record by name and type.
//
// ## Implementations
//
// - Cloudflare: `failover-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use failover_core::traits::{DnsProvider, RecordType};
//
// let existing = provider.find_record("app.example.com", RecordType::Cname).await?;
// if let Some(record) = existing {
//     provider.delete_record(&record.id).await?;
// }
// provider
//     .create_record("app.example.com", RecordType::Cname, "backup.example.com", 60)
//     .await?;
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// DNS record types managed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    /// Address record for a backend host
    A,
    /// Alias record pointing at a host record
    Cname,
}

impl RecordType {
    /// Wire name of the record type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Cname => "CNAME",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record living in the provider, as far as the controller tracks it
///
/// The controller holds only what it needs to delete or recreate the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordRef {
    /// Record name (fully qualified)
    pub name: String,
    /// Record type
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// Provider-assigned record id
    pub id: String,
    /// Record content (IP for A, target host for CNAME)
    #[serde(default)]
    pub content: String,
}

/// Trait for DNS provider implementations
///
/// # Contract
///
/// - Every call carries a bounded timeout.
/// - Calls are single-shot: implementations MUST NOT retry or back off.
///   The reconciler owns retry policy because it knows which larger intent a
///   call belongs to.
/// - Any transport failure or unsuccessful API response is returned as
///   [`crate::Error::Provider`].
/// - Implementations hold no state between calls beyond the HTTP client and
///   credentials.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Find a record by name and type
    ///
    /// Returns `Ok(None)` when nothing matches. When the provider returns more
    /// than one match, the first in provider order is returned and the
    /// duplicate is logged.
    async fn find_record(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<DnsRecordRef>, crate::Error>;

    /// Create a record and return its reference
    async fn create_record(
        &self,
        name: &str,
        record_type: RecordType,
        content: &str,
        ttl: u32,
    ) -> Result<DnsRecordRef, crate::Error>;

    /// Delete a record by id
    ///
    /// Deleting an id that no longer exists is not an error.
    async fn delete_record(&self, id: &str) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Controller configuration (provider credentials, base domain,
    ///   request timeout)
    fn create(
        &self,
        config: &crate::config::ControllerConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
