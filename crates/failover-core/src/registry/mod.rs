//! Plugin-based provider registry
//!
//! DNS providers register a factory under a type name; the controller picks
//! one from [`ProviderConfig::type_name`](crate::config::ProviderConfig::type_name)
//! instead of a hardcoded match.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use failover_core::registry::ProviderRegistry;
//!
//! let registry = ProviderRegistry::new();
//! failover_provider_cloudflare::register(&registry);
//!
//! let provider = registry.create_provider(&controller_config)?;
//! ```

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory};
use std::collections::HashMap;
use std::sync::RwLock;

/// Provider registry for plugin-based DNS provider creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory under `name`
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        providers.insert(name.into(), factory);
    }

    /// Create the provider selected by `config.provider`
    ///
    /// Fails with [`Error::Config`] when no factory is registered for the
    /// provider type.
    pub fn create_provider(&self, config: &ControllerConfig) -> Result<Box<dyn DnsProvider>> {
        let provider_type = config.provider.type_name();
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());

        let factory = providers.get(provider_type).ok_or_else(|| {
            Error::config(format!("Unknown provider type: {}", provider_type))
        })?;

        factory.create(config)
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        providers.contains_key(name)
    }
}
