//! scontrino — fiscal receipt emission core for restaurant POS.
//!
//! Converts completed orders into provider-verified Italian fiscal receipts
//! ("scontrino fiscale") through pluggable cloud backends, with in-process
//! idempotency, a mock provider fallback for terminals without fiscal
//! onboarding, and a persisted retry workflow that reconciles failed
//! emissions out-of-band.
//!
//! Construct a [`FiscalService`] at the application's composition root and
//! drive order creation through [`retry::emit_for_new_order`]; failed orders
//! are recovered later via [`retry::retry_failed_orders`].

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod http;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

pub use config::{FiscalConfig, FiscalConfigUpdate};
pub use provider::FiscalProvider;
pub use retry::RetrySummary;
pub use service::FiscalService;
pub use store::{OrderStore, SqliteOrderStore, StoredOrder, StoredOrderItem};
pub use types::{
    FiscalOrderData, FiscalOrderItem, FiscalProviderResult, FiscalReceipt, FiscalStatus,
    PaymentMethod,
};

/// Initialize tracing for binaries and tests embedding the fiscal core.
///
/// Respects `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .try_init();
}
