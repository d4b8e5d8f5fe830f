// # Cloudflare DNS Provider
//
// Cloudflare API v4 implementation of the failover controller's DnsProvider.
//
// ## Contract
//
// - One logical call, one HTTP request (plus a zone lookup when no zone id is
//   configured)
// - NO retry or backoff: the reconciler owns retry policy
// - Every request carries the per-request timeout from the controller config
// - Any transport failure or `success != true` response is a provider error
//   carrying the first Cloudflare error code
// - Deleting a record that is already gone succeeds
//
// ## Security
//
// - The API token is sent as a bearer credential and never logged
// - `Debug` output redacts it
//
// ## API Reference
//
// - List DNS Records: GET `/zones/:zone_id/dns_records?name=...&type=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`
// - List Zones: GET `/zones?name=...`

use async_trait::async_trait;
use failover_core::config::{ControllerConfig, ProviderConfig};
use failover_core::traits::{DnsProvider, DnsProviderFactory, DnsRecordRef, RecordType};
use failover_core::{Error, Result};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Provider name used in errors and logs
const PROVIDER: &str = "cloudflare";

/// Error code Cloudflare returns when deleting a record that does not exist
const RECORD_NOT_FOUND: i64 = 81044;

/// Response envelope shared by every API v4 endpoint
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RecordInfo {
    id: String,
    name: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ZoneInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Deleted {}

/// Cloudflare DNS provider
///
/// Stateless and single-shot: nothing is cached between calls, so a zone id
/// that is not configured is looked up on every call.
pub struct CloudflareProvider {
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Zone ID (optional, resolved from `base_domain` when absent)
    zone_id: Option<String>,

    /// Zone apex used for zone lookup
    base_domain: String,

    /// API base URL (overridable for tests)
    api_base: String,

    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("base_domain", &self.base_domain)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `zone_id`: Optional zone ID (looked up from `base_domain` otherwise)
    /// - `base_domain`: Zone apex, e.g. "example.com"
    /// - `timeout`: Per-request timeout
    pub fn new(
        api_token: impl Into<String>,
        zone_id: Option<String>,
        base_domain: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            zone_id: zone_id.filter(|id| !id.is_empty()),
            base_domain: base_domain.into(),
            api_base: CLOUDFLARE_API_BASE.to_string(),
            client,
        })
    }

    /// Send requests to another API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Configured zone id, or the id of the zone named `base_domain`
    async fn zone_id(&self) -> Result<String> {
        if let Some(zone_id) = &self.zone_id {
            return Ok(zone_id.clone());
        }

        tracing::debug!(zone = %self.base_domain, "Looking up zone ID");
        let url = format!("{}/zones", self.api_base);
        let zones: Vec<ZoneInfo> = self
            .request(Method::GET, &url, &[("name", self.base_domain.as_str())], None)
            .await?;

        zones
            .into_iter()
            .next()
            .map(|zone| zone.id)
            .ok_or_else(|| {
                Error::provider(PROVIDER, format!("Zone not found: {}", self.base_domain))
            })
    }

    /// Send one request and unwrap the API envelope
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_token)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to read response: {}", e)))?;

        parse_envelope(status, &text)
    }
}

/// Turn an HTTP status and body into the envelope's result
fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    let envelope: ApiEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Err(Error::provider(
                PROVIDER,
                format!("Unexpected response (HTTP {}): {}", status, e),
            ));
        }
    };

    if !envelope.success || !(200..300).contains(&status) {
        return Err(match envelope.errors.into_iter().next() {
            Some(first) => Error::provider_code(PROVIDER, first.code, first.message),
            None => Error::provider(PROVIDER, format!("Request failed with HTTP {}", status)),
        });
    }

    envelope
        .result
        .ok_or_else(|| Error::provider(PROVIDER, "Response has no result"))
}

fn record_ref(info: RecordInfo, record_type: RecordType) -> DnsRecordRef {
    DnsRecordRef {
        name: info.name,
        record_type,
        id: info.id,
        content: info.content,
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn find_record(&self, name: &str, record_type: RecordType) -> Result<Option<DnsRecordRef>> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);

        let records: Vec<RecordInfo> = self
            .request(
                Method::GET,
                &url,
                &[("name", name), ("type", record_type.as_str())],
                None,
            )
            .await?;

        if records.len() > 1 {
            tracing::warn!(
                name,
                %record_type,
                count = records.len(),
                "Multiple records found; using the first"
            );
        }

        Ok(records
            .into_iter()
            .next()
            .map(|info| record_ref(info, record_type)))
    }

    async fn create_record(
        &self,
        name: &str,
        record_type: RecordType,
        content: &str,
        ttl: u32,
    ) -> Result<DnsRecordRef> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);

        let body = serde_json::json!({
            "type": record_type.as_str(),
            "name": name,
            "content": content,
            "ttl": ttl,
            "proxied": false,
        });

        let created: RecordInfo = self.request(Method::POST, &url, &[], Some(body)).await?;
        tracing::info!(name, %record_type, content, record_id = %created.id, "Cloudflare record created");
        Ok(record_ref(created, record_type))
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, id);

        match self.request::<Deleted>(Method::DELETE, &url, &[], None).await {
            Ok(_) => {
                tracing::info!(record_id = id, "Cloudflare record deleted");
                Ok(())
            }
            Err(Error::Provider {
                code: Some(RECORD_NOT_FOUND),
                ..
            }) => {
                tracing::debug!(record_id = id, "Record already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &ControllerConfig) -> Result<Box<dyn DnsProvider>> {
        match &config.provider {
            ProviderConfig::Cloudflare { api_token, zone_id } => {
                let provider = CloudflareProvider::new(
                    api_token.clone(),
                    zone_id.clone(),
                    config.base_domain.clone(),
                    Duration::from_secs(config.reconcile.provider_timeout_secs),
                )?;
                Ok(Box::new(provider))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use failover_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// failover_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &failover_core::ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory));
}
