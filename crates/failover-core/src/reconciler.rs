//! Record reconciler
//!
//! Makes the provider's live records match an intended target:
//!
//! - [`Reconciler::point_alias_to`]: delete every CNAME for the alias, then
//!   create one pointing at the target host record
//! - [`Reconciler::create_initial_topology`]: create both A records and the
//!   CNAME, rolling back whatever was created if any step fails
//! - [`Reconciler::remove_topology`]: delete all managed records
//!
//! ## Consistency gap
//!
//! Providers without an atomic upsert leave a window between delete and
//! create. If create fails after delete, the alias has no record. The caller
//! leaves its state unchanged so the next attempt repeats the whole swap;
//! the delete is then a no-op and the create is retried.
//!
//! ## Retries
//!
//! Providers are single-shot. Each provider step here is retried up to
//! `max_retries` times with a fixed delay, for retryable errors only.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsRecordRef, ManagedRecords, RecordType};

/// Upper bound on duplicate records swept for one name
const MAX_SWEEP: usize = 16;

/// Applies DNS changes through a provider
pub struct Reconciler {
    provider: Arc<dyn DnsProvider>,
    max_retries: usize,
    retry_delay: std::time::Duration,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(provider: Arc<dyn DnsProvider>, config: &ReconcileConfig) -> Self {
        Self {
            provider,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Provider in use
    pub fn provider(&self) -> &Arc<dyn DnsProvider> {
        &self.provider
    }

    /// Point `alias` at `target` (a host record name)
    ///
    /// Returns the created CNAME. Succeeds only if creation succeeds. Safe to
    /// repeat: the result is always exactly one CNAME for the alias.
    pub async fn point_alias_to(&self, alias: &str, target: &str, ttl: u32) -> Result<DnsRecordRef> {
        info!(alias, target, "Pointing alias");

        self.sweep(alias, RecordType::Cname).await?;

        let created = self
            .with_retry("create alias", || {
                self.provider.create_record(alias, RecordType::Cname, target, ttl)
            })
            .await
            .inspect_err(|e| {
                error!(alias, target, error = %e, "Alias record deleted but not recreated");
            })?;

        info!(alias, target, record_id = %created.id, "Alias now points at target");
        Ok(created)
    }

    /// Create primary A, backup A, then the alias CNAME pointing at primary
    ///
    /// On failure every record created during this call is deleted before the
    /// error is returned.
    pub async fn create_initial_topology(
        &self,
        alias: &str,
        primary_host: &str,
        primary_ip: IpAddr,
        backup_host: &str,
        backup_ip: IpAddr,
        ttl: u32,
    ) -> Result<ManagedRecords> {
        let mut created: Vec<DnsRecordRef> = Vec::with_capacity(3);

        let result = async {
            let primary = self
                .create(primary_host, RecordType::A, &primary_ip.to_string(), ttl)
                .await?;
            created.push(primary.clone());

            let backup = self
                .create(backup_host, RecordType::A, &backup_ip.to_string(), ttl)
                .await?;
            created.push(backup.clone());

            let alias = self.create(alias, RecordType::Cname, primary_host, ttl).await?;
            created.push(alias.clone());

            Ok::<_, Error>(ManagedRecords {
                primary,
                backup,
                alias,
            })
        }
        .await;

        match result {
            Ok(records) => {
                info!(alias, primary_host, backup_host, "Initial topology created");
                Ok(records)
            }
            Err(e) => {
                error!(alias, error = %e, created = created.len(), "Topology creation failed; rolling back");
                self.rollback(&created).await;
                Err(e)
            }
        }
    }

    /// Delete every managed record: by stored id first, then by name
    pub async fn remove_topology(&self, records: &ManagedRecords) -> Result<()> {
        // Alias first so it never points at a deleted host record
        for record in [&records.alias, &records.primary, &records.backup] {
            self.with_retry("delete record", || self.provider.delete_record(&record.id))
                .await?;
            self.sweep(&record.name, record.record_type).await?;
        }
        info!(alias = %records.alias.name, "Managed records removed");
        Ok(())
    }

    /// Delete the records created during a failed setup
    ///
    /// Rollback failures are logged; the original error is what the caller
    /// reports.
    pub async fn rollback(&self, created: &[DnsRecordRef]) {
        for record in created.iter().rev() {
            match self
                .with_retry("rollback delete", || self.provider.delete_record(&record.id))
                .await
            {
                Ok(()) => debug!(name = %record.name, record_id = %record.id, "Rolled back record"),
                Err(e) => error!(
                    name = %record.name,
                    record_id = %record.id,
                    error = %e,
                    "Failed to roll back record; remove it manually"
                ),
            }
        }
    }

    async fn create(&self, name: &str, record_type: RecordType, content: &str, ttl: u32) -> Result<DnsRecordRef> {
        self.with_retry("create record", || {
            self.provider.create_record(name, record_type, content, ttl)
        })
        .await
    }

    /// Delete records of `name`/`record_type` until none is left
    async fn sweep(&self, name: &str, record_type: RecordType) -> Result<()> {
        for round in 0..MAX_SWEEP {
            let found = self
                .with_retry("find record", || self.provider.find_record(name, record_type))
                .await?;

            let Some(record) = found else {
                return Ok(());
            };

            if round > 0 {
                warn!(name, %record_type, record_id = %record.id, "Removing duplicate record");
            }
            self.with_retry("delete record", || self.provider.delete_record(&record.id))
                .await?;
        }

        Err(Error::provider(
            self.provider.provider_name(),
            format!("{} {} records keep reappearing after delete", name, record_type),
        ))
    }

    /// Run one provider step with the retry policy
    async fn with_retry<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(step, attempt, error = %e, "Provider step failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
