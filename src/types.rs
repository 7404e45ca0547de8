//! Canonical fiscal data model.
//!
//! Defines the unified types exchanged between order creation, the fiscal
//! service, and the provider adapters: line items, the order payload sent to
//! a provider, provider results, and the stored receipt record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Same order id already in flight in this process.
pub const DUPLICATE_PROCESSING: &str = "DUPLICATE_PROCESSING";
/// Unexpected failure inside the service layer wrapping a provider call.
pub const SERVICE_ERROR: &str = "SERVICE_ERROR";
/// Void attempted while configuration forbids it.
pub const VOID_DISABLED: &str = "VOID_DISABLED";
/// Void/lookup target does not exist.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Transient provider outage.
pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
/// Anything the provider layer could not classify.
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Payment method recorded on a fiscal receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Digital,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Digital => "digital",
        }
    }
}

/// Fiscal status of an order.
///
/// `pending` — created but not yet fiscalized; `success` — terminal, carries
/// an external id; `error` — failed, queued for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiscalStatus {
    Pending,
    Success,
    Error,
}

impl FiscalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiscalStatus::Pending => "pending",
            FiscalStatus::Success => "success",
            FiscalStatus::Error => "error",
        }
    }

    /// Parse a database value. Unknown strings map to `Pending`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "success" => FiscalStatus::Success,
            "error" => FiscalStatus::Error,
            _ => FiscalStatus::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Order payload
// ---------------------------------------------------------------------------

/// A single line item submitted for fiscalization.
///
/// `total_price == unit_price * quantity` is the caller's responsibility;
/// the provider layer does not re-derive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalOrderItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    /// Unit price in cents (e.g. 850 = 8.50 EUR).
    pub unit_price: i64,
    /// Total price in cents.
    pub total_price: i64,
    /// VAT rate percentage (e.g. 22).
    pub vat_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Canonical order data sent to a fiscal provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalOrderData {
    /// Opaque, stable order identifier; used for idempotency.
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub items: Vec<FiscalOrderItem>,
    /// Total amount in cents, computed by the caller from the stored order.
    pub total_amount: i64,
    /// Total VAT in cents, computed by the caller.
    pub total_vat: i64,
    pub payment_method: PaymentMethod,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Provider result / receipt
// ---------------------------------------------------------------------------

/// Result of a fiscal provider operation.
///
/// Ordinary failures travel in here (`success: false` plus `error` /
/// `error_code`) rather than as errors; only transport-level faults surface
/// as `FiscalApiError` and are normalized by the service layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FiscalProviderResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

impl FiscalProviderResult {
    /// Successful result carrying the provider's receipt key.
    pub fn ok(external_id: impl Into<String>) -> Self {
        Self {
            success: true,
            external_id: Some(external_id.into()),
            ..Default::default()
        }
    }

    /// Failure result with a message and machine-readable code.
    pub fn failure(error: impl Into<String>, code: &str) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_code: Some(code.to_string()),
            ..Default::default()
        }
    }
}

/// A previously emitted fiscal receipt, retrievable by external id.
///
/// Created by a provider at emission time, read-only afterward, removed only
/// by an explicit void.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalReceipt {
    pub id: String,
    pub order_id: String,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_data: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// VAT helpers
// ---------------------------------------------------------------------------

/// Compute total VAT in cents from the line items, per-item:
/// `round(total_price * rate / (100 + rate))`, summed.
///
/// Honors mixed VAT rates (beverages vs food); for all-22% carts it agrees
/// with [`flat_vat`] on the order total modulo per-line rounding.
pub fn vat_from_items(items: &[FiscalOrderItem]) -> i64 {
    items
        .iter()
        .map(|item| {
            let rate = item.vat_rate as f64;
            (item.total_price as f64 * rate / (100.0 + rate)).round() as i64
        })
        .sum()
}

/// Flat 22% VAT extracted from a gross total in cents: `round(total * 22/122)`.
///
/// Used where only the order's stored total is available (order creation and
/// retry rebuilds), matching the persisted totals the rest of the POS shows.
pub fn flat_vat(total_cents: i64) -> i64 {
    (total_cents as f64 * 22.0 / 122.0).round() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
