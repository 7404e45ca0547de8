//! Fiscal service orchestration.
//!
//! Single entry point for fiscal operations, used by order creation and the
//! retry workflow: in-flight deduplication, the global enable switch, error
//! normalization, void gating, and provider re-resolution on config updates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};

use crate::config::{FiscalConfig, FiscalConfigUpdate};
use crate::provider::FiscalProvider;
use crate::providers::ProviderFactory;
use crate::types::{
    FiscalOrderData, FiscalProviderResult, FiscalReceipt, DUPLICATE_PROCESSING, SERVICE_ERROR,
    VOID_DISABLED,
};

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// RAII marker for an order id in the in-flight set.
///
/// The check-and-insert happens under a single lock acquisition, so two
/// near-simultaneous submissions of the same order can never both proceed.
/// Dropping the guard releases the marker on every exit path.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    order_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, order_id: &str) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(order_id.to_string()) {
            return None;
        }
        Some(Self {
            in_flight,
            order_id: order_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.order_id);
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Fiscal emission orchestrator.
///
/// Construct one at the application's composition root and share it
/// (`Arc<FiscalService>`); configuration changes go through
/// [`FiscalService::update_config`] rather than mutable global state.
pub struct FiscalService {
    factory: ProviderFactory,
    config: Mutex<FiscalConfig>,
    provider: Mutex<Arc<dyn FiscalProvider>>,
    in_flight: Mutex<HashSet<String>>,
}

impl FiscalService {
    pub fn new(config: FiscalConfig) -> Self {
        let factory = ProviderFactory::new();
        let provider = factory.get(&config);
        Self {
            factory,
            config: Mutex::new(config),
            provider: Mutex::new(provider),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Build from `FISCAL_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(FiscalConfig::from_env())
    }

    /// Build with an explicit provider instance (tests, custom backends).
    pub fn with_provider(config: FiscalConfig, provider: Arc<dyn FiscalProvider>) -> Self {
        Self {
            factory: ProviderFactory::new(),
            config: Mutex::new(config),
            provider: Mutex::new(provider),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Emit a fiscal receipt for an order.
    ///
    /// Guards against concurrent duplicate submission of the same order id
    /// within this process. Never panics or returns an error: every outcome
    /// is a [`FiscalProviderResult`].
    pub async fn emit_receipt(&self, data: &FiscalOrderData) -> FiscalProviderResult {
        let _guard = match InFlightGuard::acquire(&self.in_flight, &data.order_id) {
            Some(guard) => guard,
            None => {
                warn!(order_id = %data.order_id, "duplicate fiscal submission rejected");
                return FiscalProviderResult::failure(
                    "Order is already being processed",
                    DUPLICATE_PROCESSING,
                );
            }
        };

        let enabled = self.lock_config().enabled;
        if !enabled {
            debug!(order_id = %data.order_id, "fiscalization disabled, skipping");
            return FiscalProviderResult::ok(format!("DISABLED-{}", data.order_id));
        }

        let provider = self.active_provider();
        match provider.emit_receipt(data).await {
            Ok(result) => result,
            Err(err) => {
                error!(order_id = %data.order_id, "fiscal service error: {err}");
                FiscalProviderResult::failure(err.to_string(), SERVICE_ERROR)
            }
        }
    }

    /// Health check for the active provider. Swallows faults into `false`.
    pub async fn health_check(&self) -> bool {
        self.active_provider().health_check().await
    }

    /// Look up a previously emitted receipt by external id.
    pub async fn get_receipt(&self, external_id: &str) -> Option<FiscalReceipt> {
        self.active_provider().get_receipt(external_id).await
    }

    /// Void a receipt (storno). Gated by `void_enabled`; when disabled the
    /// provider is never contacted.
    pub async fn void_receipt(&self, external_id: &str) -> FiscalProviderResult {
        let void_enabled = self.lock_config().void_enabled;
        if !void_enabled {
            return FiscalProviderResult::failure("Receipt voiding is disabled", VOID_DISABLED);
        }

        let provider = self.active_provider();
        match provider.void_receipt(external_id).await {
            Ok(result) => result,
            Err(err) => {
                error!("fiscal void error for {external_id}: {err}");
                FiscalProviderResult::failure(err.to_string(), SERVICE_ERROR)
            }
        }
    }

    /// Merge a partial config update and re-resolve the active provider, so
    /// switching provider or mock mode takes effect on the next call.
    pub fn update_config(&self, update: FiscalConfigUpdate) {
        let mut config = self.lock_config();
        config.apply(update);
        let provider = self.factory.get(&config);
        drop(config);
        *self
            .provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = provider;
    }

    /// Drop cached provider instances and re-resolve from the current
    /// configuration (credentials rotated, endpoint changed).
    pub fn reload_provider(&self) {
        self.factory.clear();
        let config = self.lock_config();
        let provider = self.factory.get(&config);
        drop(config);
        *self
            .provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = provider;
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> FiscalConfig {
        self.lock_config().clone()
    }

    fn active_provider(&self) -> Arc<dyn FiscalProvider> {
        Arc::clone(
            &self
                .provider
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn lock_config(&self) -> std::sync::MutexGuard<'_, FiscalConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
