//! Configuration types for the failover controller
//!
//! Two layers live here:
//! - [`ControllerConfig`]: per-process settings (provider credential, base
//!   domain, state path, probe and retry tuning). Loaded once at start.
//! - [`FailoverConfig`]: the topology fixed by setup. Persisted inside the
//!   state document and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Per-process controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// DNS provider configuration
    pub provider: ProviderConfig,

    /// Zone apex that managed names are qualified against (e.g. "example.com")
    pub base_domain: String,

    /// Path of the persisted state document
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Defaults applied by setup when the operator passes no explicit values
    #[serde(default)]
    pub defaults: SetupDefaults,

    /// Health probe tuning
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Reconciliation retry policy
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Mutation lock tuning
    #[serde(default)]
    pub lock: LockConfig,
}

impl ControllerConfig {
    /// Create a configuration with defaults for everything but the provider and domain
    pub fn new(provider: ProviderConfig, base_domain: impl Into<String>) -> Self {
        Self {
            provider,
            base_domain: base_domain.into(),
            state_path: default_state_path(),
            defaults: SetupDefaults::default(),
            probe: ProbeConfig::default(),
            reconcile: ReconcileConfig::default(),
            lock: LockConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()?;

        if self.base_domain.trim().is_empty() {
            return Err(crate::Error::config("Base domain cannot be empty"));
        }
        validate_domain_name(&self.base_domain)?;

        if self.state_path.as_os_str().is_empty() {
            return Err(crate::Error::config("State path cannot be empty"));
        }

        self.defaults.validate()?;
        self.probe.validate()?;

        Ok(())
    }

    /// Qualify a record name against the base domain
    ///
    /// `"www"` becomes `"www.example.com"`; `"www.example.com"` and
    /// `"example.com"` are returned unchanged.
    pub fn qualify(&self, name: &str) -> String {
        qualify_name(name, &self.base_domain)
    }

    /// Path of the liveness marker that sits next to the state document
    pub fn marker_path(&self) -> PathBuf {
        sibling_path(&self.state_path, "pid")
    }

    /// Path of the mutation lock file that sits next to the state document
    pub fn lock_path(&self) -> PathBuf {
        sibling_path(&self.state_path, "lock")
    }
}

fn sibling_path(path: &std::path::Path, extension: &str) -> PathBuf {
    let mut sibling = path.as_os_str().to_owned();
    sibling.push(".");
    sibling.push(extension);
    PathBuf::from(sibling)
}

/// Qualify `name` against `base_domain`
pub fn qualify_name(name: &str, base_domain: &str) -> String {
    let name = name.trim().trim_end_matches('.');
    let base = base_domain.trim().trim_end_matches('.');

    let suffix = format!(".{}", base.to_ascii_lowercase());
    if name.eq_ignore_ascii_case(base) || name.to_ascii_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}.{}", name, base)
    }
}

/// Validate that a string is a plausible DNS name
///
/// Basic RFC 1035 checks: total length, label length, allowed characters.
pub fn validate_domain_name(domain: &str) -> Result<(), crate::Error> {
    if domain.is_empty() {
        return Err(crate::Error::invalid_input("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(crate::Error::invalid_input(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(crate::Error::invalid_input(format!(
                "Domain name has empty label: '{}'",
                domain
            )));
        }

        if label.len() > 63 {
            return Err(crate::Error::invalid_input(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(crate::Error::invalid_input(format!(
                "Domain label contains invalid characters: '{}'",
                label
            )));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::Error::invalid_input(format!(
                "Domain label cannot start or end with hyphen: '{}'",
                label
            )));
        }
    }

    Ok(())
}

/// DNS provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token (sent as a bearer credential)
        api_token: String,
        /// Zone ID (optional, resolved from the base domain when absent)
        zone_id: Option<String>,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Cloudflare { zone_id, .. } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<REDACTED>")
                .field("zone_id", zone_id)
                .finish(),
            ProviderConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", &"<REDACTED>")
                .finish(),
        }
    }
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare { api_token, .. } => {
                if api_token.is_empty() {
                    return Err(crate::Error::config("Cloudflare API token cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Topology fixed at setup time
///
/// Record names are stored fully qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Public alias (CNAME) name
    pub alias: String,
    /// Host record (A) for the primary backend
    pub primary_record: String,
    /// Host record (A) for the backup backend
    pub backup_record: String,
    /// Primary backend address
    pub primary_ip: IpAddr,
    /// Backup backend address
    pub backup_ip: IpAddr,
    /// Seconds between monitor ticks
    pub check_interval_secs: u64,
    /// Consecutive unhealthy probes before failing over
    pub failure_threshold: u32,
    /// Consecutive healthy probes before failing back
    pub recovery_threshold: u32,
    /// TTL for the managed records
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

impl FailoverConfig {
    /// Validate the topology
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_domain_name(&self.alias)?;
        validate_domain_name(&self.primary_record)?;
        validate_domain_name(&self.backup_record)?;

        if self.primary_record.eq_ignore_ascii_case(&self.backup_record) {
            return Err(crate::Error::invalid_input(
                "Primary and backup record names must differ",
            ));
        }
        if self.alias.eq_ignore_ascii_case(&self.primary_record)
            || self.alias.eq_ignore_ascii_case(&self.backup_record)
        {
            return Err(crate::Error::invalid_input(
                "Alias name must differ from the host record names",
            ));
        }
        if self.check_interval_secs == 0 {
            return Err(crate::Error::invalid_input("Check interval must be > 0"));
        }
        if self.failure_threshold == 0 || self.recovery_threshold == 0 {
            return Err(crate::Error::invalid_input("Thresholds must be >= 1"));
        }
        if self.ttl == 0 {
            return Err(crate::Error::invalid_input("TTL must be >= 1"));
        }

        Ok(())
    }

    /// Hysteresis thresholds
    pub fn thresholds(&self) -> crate::machine::Thresholds {
        crate::machine::Thresholds {
            failure: self.failure_threshold,
            recovery: self.recovery_threshold,
        }
    }

    /// Monitor tick period
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Host record name for a side
    pub fn record_for(&self, side: crate::machine::Side) -> &str {
        match side {
            crate::machine::Side::Primary => &self.primary_record,
            crate::machine::Side::Backup => &self.backup_record,
        }
    }

    /// Backend address for a side
    pub fn ip_for(&self, side: crate::machine::Side) -> IpAddr {
        match side {
            crate::machine::Side::Primary => self.primary_ip,
            crate::machine::Side::Backup => self.backup_ip,
        }
    }
}

/// Values setup uses when the operator does not pass them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupDefaults {
    /// Seconds between monitor ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Consecutive unhealthy probes before failing over
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive healthy probes before failing back
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,

    /// TTL for created records
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

impl SetupDefaults {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Default interval must be > 0"));
        }
        if self.failure_threshold == 0 || self.recovery_threshold == 0 {
            return Err(crate::Error::config("Default thresholds must be >= 1"));
        }
        Ok(())
    }
}

impl Default for SetupDefaults {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
            ttl: default_ttl(),
        }
    }
}

/// Health probe configuration
///
/// Each method is bounded by its own timeout so a single probe never takes
/// longer than the sum of the enabled timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Try ICMP echo (via the system `ping` binary)
    #[serde(default = "default_enabled")]
    pub icmp_enabled: bool,

    /// ICMP echo timeout in milliseconds
    #[serde(default = "default_icmp_timeout_ms")]
    pub icmp_timeout_ms: u64,

    /// Try an HTTP GET
    #[serde(default = "default_enabled")]
    pub http_enabled: bool,

    /// HTTP GET timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Path requested by the HTTP GET
    #[serde(default = "default_http_path")]
    pub http_path: String,

    /// Try a TCP connect
    #[serde(default = "default_enabled")]
    pub tcp_enabled: bool,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_tcp_timeout_ms")]
    pub tcp_timeout_ms: u64,

    /// Port for the TCP connect
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

impl ProbeConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        for (name, ms) in [
            ("ICMP", self.icmp_timeout_ms),
            ("HTTP", self.http_timeout_ms),
            ("TCP", self.tcp_timeout_ms),
        ] {
            if ms == 0 {
                return Err(crate::Error::config(format!("{} probe timeout must be > 0", name)));
            }
        }
        if !self.http_path.starts_with('/') {
            return Err(crate::Error::config("HTTP probe path must start with '/'"));
        }
        Ok(())
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            icmp_enabled: true,
            icmp_timeout_ms: default_icmp_timeout_ms(),
            http_enabled: true,
            http_timeout_ms: default_http_timeout_ms(),
            http_path: default_http_path(),
            tcp_enabled: true,
            tcp_timeout_ms: default_tcp_timeout_ms(),
            tcp_port: default_tcp_port(),
        }
    }
}

/// Reconciliation retry policy
///
/// Providers never retry on their own; the reconciler retries each step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Additional attempts per provider step after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-request timeout handed to provider clients, in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl ReconcileConfig {
    /// Delay between attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Mutation lock tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a mutator waits for the lock, in seconds
    #[serde(default = "default_lock_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Lock files with an unreadable holder older than this are considered
    /// abandoned, in seconds. A live holder is never reclaimed.
    #[serde(default = "default_lock_stale_secs")]
    pub stale_after_secs: u64,
}

impl LockConfig {
    /// How long a mutator waits for the lock
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Age after which a lock file is considered abandoned
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: default_lock_timeout_secs(),
            stale_after_secs: default_lock_stale_secs(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/dns-failover/state.json")
}

fn default_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    3
}

fn default_ttl() -> u32 {
    60
}

fn default_icmp_timeout_ms() -> u64 {
    1000
}

fn default_http_timeout_ms() -> u64 {
    2000
}

fn default_http_path() -> String {
    "/".to_string()
}

fn default_tcp_timeout_ms() -> u64 {
    1000
}

fn default_tcp_port() -> u16 {
    80
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_lock_stale_secs() -> u64 {
    120
}
