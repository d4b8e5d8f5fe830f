//! Health prober
//!
//! `probe(address)` never fails: anything other than a positive answer from
//! one of the probe methods maps to [`Health::Unhealthy`].
//!
//! [`LayeredProber`] tries its methods in order and stops at the first
//! success:
//!
//! 1. ICMP echo through the system `ping` binary (~1s)
//! 2. HTTP GET on port 80 (~2s)
//! 3. TCP connect to port 80 (~1s)
//!
//! Each method is wrapped in its own timeout, so one hanging method cannot
//! stretch a probe beyond the sum of the per-method bounds. A host for which
//! no method could run at all is reported unhealthy (fail closed).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ProbeConfig;

/// Result of probing one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Health {
    /// At least one probe method got an answer
    Healthy,
    /// No probe method got an answer
    Unhealthy(ProbeFailure),
}

impl Health {
    /// Shorthand for `matches!(self, Health::Healthy)`
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => f.write_str("healthy"),
            Health::Unhealthy(ProbeFailure::Inconclusive) => f.write_str("unhealthy"),
            Health::Unhealthy(ProbeFailure::NoMethodAvailable) => {
                f.write_str("unhealthy (no probe method available)")
            }
        }
    }
}

/// Why a probe came back unhealthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    /// Methods ran but none succeeded
    Inconclusive,
    /// No method could run for this host
    NoMethodAvailable,
}

/// Trait for health probers
#[async_trait]
pub trait HealthProber: Send + Sync {
    /// Probe an address; never fails and always returns within a bounded time
    async fn probe(&self, address: IpAddr) -> Health;
}

/// Result of a single probe method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOutcome {
    /// The host answered
    Reachable,
    /// The method ran and got no (usable) answer
    Unreachable,
    /// The method cannot run here (missing binary, unsupported address)
    Unavailable,
}

/// One way of checking whether a host answers
#[async_trait]
pub trait ProbeMethod: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Upper bound for one check
    fn timeout(&self) -> Duration;

    /// Check the address. Implementations may run past [`ProbeMethod::timeout`];
    /// the layered prober enforces it.
    async fn check(&self, address: IpAddr) -> MethodOutcome;
}

/// Prober that tries several methods in order
pub struct LayeredProber {
    methods: Vec<Box<dyn ProbeMethod>>,
}

impl LayeredProber {
    /// Create a prober from an explicit list of methods
    pub fn new(methods: Vec<Box<dyn ProbeMethod>>) -> Self {
        Self { methods }
    }

    /// Create the ICMP → HTTP → TCP prober from configuration
    pub fn from_config(config: &ProbeConfig) -> Self {
        let mut methods: Vec<Box<dyn ProbeMethod>> = Vec::new();
        if config.icmp_enabled {
            methods.push(Box::new(IcmpProbe::new(Duration::from_millis(config.icmp_timeout_ms))));
        }
        if config.http_enabled {
            methods.push(Box::new(HttpProbe::new(
                Duration::from_millis(config.http_timeout_ms),
                80,
                config.http_path.clone(),
            )));
        }
        if config.tcp_enabled {
            methods.push(Box::new(TcpProbe::new(
                Duration::from_millis(config.tcp_timeout_ms),
                config.tcp_port,
            )));
        }
        Self::new(methods)
    }
}

#[async_trait]
impl HealthProber for LayeredProber {
    async fn probe(&self, address: IpAddr) -> Health {
        let mut attempted = false;

        for method in &self.methods {
            let outcome = match tokio::time::timeout(method.timeout(), method.check(address)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    trace!(method = method.name(), %address, "probe method timed out");
                    MethodOutcome::Unreachable
                }
            };

            match outcome {
                MethodOutcome::Reachable => {
                    debug!(method = method.name(), %address, "probe succeeded");
                    return Health::Healthy;
                }
                MethodOutcome::Unreachable => {
                    attempted = true;
                    debug!(method = method.name(), %address, "probe method got no answer");
                }
                MethodOutcome::Unavailable => {
                    debug!(method = method.name(), %address, "probe method unavailable");
                }
            }
        }

        if attempted {
            Health::Unhealthy(ProbeFailure::Inconclusive)
        } else {
            Health::Unhealthy(ProbeFailure::NoMethodAvailable)
        }
    }
}

/// ICMP echo through the system `ping` binary
///
/// Raw ICMP sockets need privileges the controller should not ask for.
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    timeout: Duration,
}

impl IcmpProbe {
    /// Create an ICMP probe with the given reply timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProbeMethod for IcmpProbe {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn timeout(&self) -> Duration {
        // ping's own -W deadline plus process start-up slack
        self.timeout + Duration::from_millis(500)
    }

    async fn check(&self, address: IpAddr) -> MethodOutcome {
        let wait_secs = self.timeout.as_secs().max(1).to_string();
        let mut command = tokio::process::Command::new("ping");
        if address.is_ipv6() {
            command.arg("-6");
        }
        command
            .args(["-c", "1", "-W", &wait_secs])
            .arg(address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match command.status().await {
            Ok(status) if status.success() => MethodOutcome::Reachable,
            Ok(_) => MethodOutcome::Unreachable,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MethodOutcome::Unavailable,
            Err(e) => {
                debug!(error = %e, "failed to run ping");
                MethodOutcome::Unavailable
            }
        }
    }
}

/// HTTP GET; any response below 500 counts as an answer
#[derive(Debug, Clone)]
pub struct HttpProbe {
    timeout: Duration,
    port: u16,
    path: String,
    client: Option<reqwest::Client>,
}

impl HttpProbe {
    /// Create an HTTP probe
    pub fn new(timeout: Duration, port: u16, path: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| debug!(error = %e, "failed to build HTTP probe client"))
            .ok();

        Self {
            timeout,
            port,
            path: path.into(),
            client,
        }
    }
}

#[async_trait]
impl ProbeMethod for HttpProbe {
    fn name(&self) -> &'static str {
        "http"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, address: IpAddr) -> MethodOutcome {
        let Some(client) = &self.client else {
            return MethodOutcome::Unavailable;
        };

        let url = format!("http://{}{}", SocketAddr::new(address, self.port), self.path);
        match client.get(&url).send().await {
            Ok(response) if !response.status().is_server_error() => MethodOutcome::Reachable,
            Ok(response) => {
                debug!(%address, status = %response.status(), "HTTP probe got server error");
                MethodOutcome::Unreachable
            }
            Err(_) => MethodOutcome::Unreachable,
        }
    }
}

/// Plain TCP connect
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
    port: u16,
}

impl TcpProbe {
    /// Create a TCP connect probe
    pub fn new(timeout: Duration, port: u16) -> Self {
        Self { timeout, port }
    }
}

#[async_trait]
impl ProbeMethod for TcpProbe {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, address: IpAddr) -> MethodOutcome {
        match tokio::net::TcpStream::connect(SocketAddr::new(address, self.port)).await {
            Ok(_) => MethodOutcome::Reachable,
            Err(_) => MethodOutcome::Unreachable,
        }
    }
}
