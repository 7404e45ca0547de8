//! A-Cube wire format.
//!
//! Flat request/response shapes against the A-Cube cloud fiscal API
//! (<https://www.acube.it/>). Payment methods use the Agenzia delle Entrate
//! numeric codes.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::cents_to_euros;
use crate::provider::WireFormat;
use crate::types::{FiscalOrderData, FiscalProviderResult, FiscalReceipt, PaymentMethod};

/// A-Cube wire format.
pub struct AcubeFormat;

impl AcubeFormat {
    fn map_payment_method(method: PaymentMethod) -> &'static str {
        match method {
            PaymentMethod::Cash => "01",    // Contanti
            PaymentMethod::Card => "02",    // Carta di credito/debito
            PaymentMethod::Digital => "03", // Pagamento digitale
        }
    }
}

impl WireFormat for AcubeFormat {
    fn provider_id(&self) -> &'static str {
        "acube"
    }

    fn display_name(&self) -> &'static str {
        "A-Cube"
    }

    fn receipt_payload(&self, data: &FiscalOrderData) -> Value {
        let items: Vec<Value> = data
            .items
            .iter()
            .map(|item| {
                json!({
                    "code": item.product_id,
                    "description": item.name,
                    "quantity": item.quantity,
                    "unit_price": cents_to_euros(item.unit_price),
                    "vat_rate": item.vat_rate,
                })
            })
            .collect();

        let mut payload = json!({
            "type": "receipt",
            "timestamp": data.timestamp,
            "payment_method": Self::map_payment_method(data.payment_method),
            "items": items,
            "totals": {
                "amount": cents_to_euros(data.total_amount),
                "vat": cents_to_euros(data.total_vat),
            },
        });
        if let Some(name) = &data.customer_name {
            payload["customer"] = json!({ "name": name });
        }
        payload
    }

    fn parse_emit_response(&self, response: Value) -> FiscalProviderResult {
        if response.get("success").and_then(Value::as_bool) == Some(true) {
            let external_id = response
                .get("external_id")
                .or_else(|| response.get("receipt_id"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            return FiscalProviderResult {
                receipt_number: string_field(&response, "receipt_number"),
                pdf_url: string_field(&response, "pdf_url"),
                ..FiscalProviderResult::ok(external_id)
            };
        }

        FiscalProviderResult {
            success: false,
            error: Some(
                string_field(&response, "error")
                    .unwrap_or_else(|| "Failed to emit receipt".to_string()),
            ),
            error_code: string_field(&response, "error_code"),
            raw_response: Some(response),
            ..Default::default()
        }
    }

    fn parse_get_response(&self, response: Value) -> Option<FiscalReceipt> {
        if response.is_null() || response.get("error").is_some() {
            return None;
        }

        Some(FiscalReceipt {
            id: string_field(&response, "id").unwrap_or_else(|| Uuid::new_v4().to_string()),
            order_id: string_field(&response, "order_id")?,
            external_id: string_field(&response, "external_id")?,
            receipt_number: string_field(&response, "receipt_number"),
            pdf_url: string_field(&response, "pdf_url"),
            xml_data: string_field(&response, "xml_data"),
            created_at: string_field(&response, "created_at")
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
        })
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
