//! Fiscal retry / recovery workflow.
//!
//! Finds orders whose fiscal emission previously failed, rebuilds the
//! canonical fiscal payload from the persisted order and its line items (not
//! from any cache), and resubmits them one at a time through the fiscal
//! service. Sequential with a fixed inter-item delay so a recovery batch
//! never bursts the external fiscal API.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::http::euros_to_cents;
use crate::service::FiscalService;
use crate::store::{OrderStore, StoreError, StoredOrder};
use crate::types::{flat_vat, FiscalOrderData, FiscalOrderItem, FiscalProviderResult, PaymentMethod};

/// Cap on orders processed per batch invocation, bounding external-call
/// fan-out.
pub const RETRY_BATCH_LIMIT: usize = 10;

/// Cooperative pause between consecutive retry attempts.
pub const RETRY_ITEM_DELAY: Duration = Duration::from_millis(500);

/// Flat VAT rate applied when rebuilding items from storage, which does not
/// carry per-line rates.
const DEFAULT_VAT_RATE: u32 = 22;

// ---------------------------------------------------------------------------
// Errors / summary
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("order not found: {0}")]
    OrderNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Aggregate outcome of a retry batch, for UI display ("X/Y succeeded").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub succeeded: usize,
    pub attempted: usize,
}

// ---------------------------------------------------------------------------
// Payload rebuild
// ---------------------------------------------------------------------------

/// Rebuild the canonical fiscal payload from a persisted order.
///
/// Storage keeps decimal EUR; the wire uses cents. Total VAT is extracted
/// from the stored order total at the flat default rate, matching what order
/// creation submitted.
pub fn build_fiscal_data(order: &StoredOrder, payment_method: PaymentMethod) -> FiscalOrderData {
    let items: Vec<FiscalOrderItem> = order
        .items
        .iter()
        .map(|item| FiscalOrderItem {
            product_id: item.product_id.clone(),
            name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: euros_to_cents(item.unit_price),
            total_price: euros_to_cents(item.total_price),
            vat_rate: DEFAULT_VAT_RATE,
            category: None,
        })
        .collect();

    let total_cents = euros_to_cents(order.total_amount);
    FiscalOrderData {
        order_id: order.id.clone(),
        customer_name: order.customer_name.clone(),
        items,
        total_amount: total_cents,
        total_vat: flat_vat(total_cents),
        payment_method,
        timestamp: order.created_at.clone(),
    }
}

// ---------------------------------------------------------------------------
// Emission + persistence
// ---------------------------------------------------------------------------

/// Emit a receipt for a freshly created order and persist the outcome.
///
/// A fiscal failure is non-fatal to the order itself: the order stays
/// visible and only `fiscal_status` reflects the problem, to be reconciled
/// later by the retry workflow.
pub async fn emit_for_new_order(
    service: &FiscalService,
    store: &dyn OrderStore,
    data: &FiscalOrderData,
) -> Result<FiscalProviderResult, StoreError> {
    let result = service.emit_receipt(data).await;

    if result.success {
        let external_id = result.external_id.as_deref().unwrap_or_default();
        store
            .mark_fiscal_success(&data.order_id, external_id, result.pdf_url.as_deref())
            .await?;
    } else {
        let message = result.error.as_deref().unwrap_or("Unknown error");
        store
            .append_fiscal_error(&data.order_id, &format!("Fiscal error: {message}"))
            .await?;
    }
    Ok(result)
}

/// Retry fiscalization of a single order (interactive path, no delay).
///
/// Re-reads the order and items from the store, resubmits, and persists the
/// outcome. Success leaves the existing notes untouched; only failures
/// append.
pub async fn retry_order(
    service: &FiscalService,
    store: &dyn OrderStore,
    order_id: &str,
) -> Result<FiscalProviderResult, RetryError> {
    let order = store
        .order_with_items(order_id)
        .await?
        .ok_or_else(|| RetryError::OrderNotFound(order_id.to_string()))?;

    let data = build_fiscal_data(&order, PaymentMethod::Cash);
    let result = service.emit_receipt(&data).await;

    if result.success {
        let external_id = result.external_id.as_deref().unwrap_or_default();
        store
            .mark_fiscal_success(order_id, external_id, result.pdf_url.as_deref())
            .await?;
        info!(order_id, external_id, "fiscal retry succeeded");
    } else {
        let message = result.error.as_deref().unwrap_or("Unknown error");
        store
            .append_fiscal_error(order_id, &format!("Fiscal retry error: {message}"))
            .await?;
        warn!(order_id, "fiscal retry failed: {message}");
    }
    Ok(result)
}

/// Retry all failed orders, oldest first, up to `limit` (capped at
/// [`RETRY_BATCH_LIMIT`]).
///
/// Processing is strictly sequential with [`RETRY_ITEM_DELAY`] between
/// attempts. Individual failures are recorded on the order and counted;
/// they never abort the batch.
pub async fn retry_failed_orders(
    service: &FiscalService,
    store: &dyn OrderStore,
    limit: usize,
) -> Result<RetrySummary, StoreError> {
    let limit = limit.clamp(1, RETRY_BATCH_LIMIT);
    let orders = store.failed_fiscal_orders(limit).await?;

    let mut summary = RetrySummary::default();
    for (index, order) in orders.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(RETRY_ITEM_DELAY).await;
        }
        summary.attempted += 1;
        match retry_order(service, store, &order.id).await {
            Ok(result) if result.success => summary.succeeded += 1,
            Ok(_) => {}
            Err(err) => warn!(order_id = %order.id, "fiscal retry skipped: {err}"),
        }
    }

    info!(
        succeeded = summary.succeeded,
        attempted = summary.attempted,
        "fiscal retry batch complete"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
