//! Provider implementations and factory.

pub mod acube;
pub mod fatture_in_cloud;
pub mod mock;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::config::{FiscalConfig, PROVIDER_ACUBE, PROVIDER_EPSON, PROVIDER_FATTURE_IN_CLOUD};
use crate::provider::{FiscalProvider, HttpProvider};

use acube::AcubeFormat;
use fatture_in_cloud::FattureInCloudFormat;
use mock::MockFiscalProvider;

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Creates and caches fiscal provider instances based on configuration.
///
/// The cache is keyed by `(provider_name, mock_mode)` so repeated requests
/// for the same configuration reuse one adapter instance. Explicitly
/// constructed and owned by the service; not a process-wide singleton.
pub struct ProviderFactory {
    cache: Mutex<HashMap<(String, bool), Arc<dyn FiscalProvider>>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the provider for the given configuration.
    pub fn get(&self, config: &FiscalConfig) -> Arc<dyn FiscalProvider> {
        let key = (config.provider.clone(), config.mock_mode);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = cache.get(&key) {
            return Arc::clone(provider);
        }

        let provider = create_provider(config);
        info!(
            provider = provider.name(),
            mock_mode = config.mock_mode,
            "fiscal provider resolved"
        );
        cache.insert(key, Arc::clone(&provider));
        provider
    }

    /// Drop all cached providers (configuration reload).
    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Selection policy: mock mode wins, then missing credentials fall back to
/// mock (never hard-fail the app), then dispatch on provider name.
fn create_provider(config: &FiscalConfig) -> Arc<dyn FiscalProvider> {
    if config.mock_mode {
        return Arc::new(MockFiscalProvider::new());
    }

    if !config.has_credentials() {
        warn!("Missing fiscal API credentials, falling back to mock provider");
        return Arc::new(MockFiscalProvider::new());
    }
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let api_endpoint = config.api_endpoint.as_deref().unwrap_or_default();

    match config.provider.as_str() {
        PROVIDER_ACUBE => Arc::new(HttpProvider::new(AcubeFormat, api_endpoint, api_key)),
        PROVIDER_FATTURE_IN_CLOUD => Arc::new(HttpProvider::new(
            FattureInCloudFormat,
            api_endpoint,
            api_key,
        )),
        PROVIDER_EPSON => {
            // Epson RT needs a direct printer transport, not HTTP
            warn!("Epson RT provider not yet implemented, using mock");
            Arc::new(MockFiscalProvider::new())
        }
        other => {
            warn!("Unknown fiscal provider '{other}', using mock");
            Arc::new(MockFiscalProvider::new())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn real_config(provider: &str) -> FiscalConfig {
        FiscalConfig {
            provider: provider.to_string(),
            mock_mode: false,
            api_key: Some("k-123".into()),
            api_endpoint: Some("https://fiscal.example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_mock_mode_forces_mock() {
        let factory = ProviderFactory::new();
        let config = FiscalConfig {
            mock_mode: true,
            ..real_config(PROVIDER_ACUBE)
        };
        assert_eq!(factory.get(&config).name(), "MockFiscalProvider");
    }

    #[test]
    fn test_missing_credentials_fall_back_to_mock() {
        let factory = ProviderFactory::new();
        let config = FiscalConfig {
            api_key: None,
            ..real_config(PROVIDER_ACUBE)
        };
        assert_eq!(factory.get(&config).name(), "MockFiscalProvider");
    }

    #[test]
    fn test_named_providers_resolve() {
        let factory = ProviderFactory::new();
        assert_eq!(factory.get(&real_config(PROVIDER_ACUBE)).name(), "A-Cube");
        assert_eq!(
            factory.get(&real_config(PROVIDER_FATTURE_IN_CLOUD)).name(),
            "FattureInCloud"
        );
    }

    #[test]
    fn test_epson_and_unknown_fall_back_to_mock() {
        let factory = ProviderFactory::new();
        assert_eq!(
            factory.get(&real_config(PROVIDER_EPSON)).name(),
            "MockFiscalProvider"
        );
        assert_eq!(
            factory.get(&real_config("quantum-rt")).name(),
            "MockFiscalProvider"
        );
    }

    #[test]
    fn test_cache_reuses_instances() {
        let factory = ProviderFactory::new();
        let config = real_config(PROVIDER_ACUBE);
        let a = factory.get(&config);
        let b = factory.get(&config);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_clear_drops_cache() {
        let factory = ProviderFactory::new();
        let config = real_config(PROVIDER_ACUBE);
        let a = factory.get(&config);
        factory.clear();
        let b = factory.get(&config);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_mock_and_real_cached_separately() {
        let factory = ProviderFactory::new();
        let real = real_config(PROVIDER_ACUBE);
        let mocked = FiscalConfig {
            mock_mode: true,
            ..real.clone()
        };
        let a = factory.get(&real);
        let b = factory.get(&mocked);
        assert_ne!(a.name(), b.name());
    }
}
