//! Fatture in Cloud wire format.
//!
//! Italian-named fields nested under a `data` key, per the Fatture in Cloud
//! API (<https://www.fattureincloud.it/>). Unlike A-Cube, the void response
//! also carries the receipt number when available.

use chrono::Utc;
use serde_json::{json, Value};

use crate::http::cents_to_euros;
use crate::provider::WireFormat;
use crate::types::{FiscalOrderData, FiscalProviderResult, FiscalReceipt, PaymentMethod};

/// Fatture in Cloud wire format.
pub struct FattureInCloudFormat;

impl FattureInCloudFormat {
    fn map_payment_method(method: PaymentMethod) -> &'static str {
        match method {
            PaymentMethod::Cash => "contanti",
            PaymentMethod::Card => "bancomat",
            PaymentMethod::Digital => "altro",
        }
    }
}

impl WireFormat for FattureInCloudFormat {
    fn provider_id(&self) -> &'static str {
        "fatture-in-cloud"
    }

    fn display_name(&self) -> &'static str {
        "FattureInCloud"
    }

    fn receipt_payload(&self, data: &FiscalOrderData) -> Value {
        let lines: Vec<Value> = data
            .items
            .iter()
            .map(|item| {
                json!({
                    "descrizione": item.name,
                    "quantita": item.quantity,
                    "prezzo_unitario": cents_to_euros(item.unit_price),
                    "aliquota_iva": item.vat_rate,
                })
            })
            .collect();

        json!({
            "document_type": "receipt",
            "data": {
                "id_ordine": data.order_id,
                "data_documento": data.timestamp,
                "tipo_pagamento": Self::map_payment_method(data.payment_method),
                "oggetto": data.customer_name.as_deref().unwrap_or("Scontrino POS"),
                "dettaglio_linee": lines,
                "importo_totale": cents_to_euros(data.total_amount),
                "importo_iva": cents_to_euros(data.total_vat),
            },
        })
    }

    fn parse_emit_response(&self, response: Value) -> FiscalProviderResult {
        let data = response.get("data").unwrap_or(&response);
        let document_id = string_field(data, "id_documento");

        if response.get("success").and_then(Value::as_bool) == Some(true)
            || document_id.is_some()
        {
            return FiscalProviderResult {
                receipt_number: string_field(data, "numero_documento"),
                pdf_url: string_field(data, "url_pdf"),
                ..FiscalProviderResult::ok(document_id.unwrap_or_default())
            };
        }

        let error = response.get("error");
        FiscalProviderResult {
            success: false,
            error: Some(
                error
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Failed to emit receipt")
                    .to_string(),
            ),
            error_code: error
                .and_then(|e| e.get("code"))
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            raw_response: Some(response),
            ..Default::default()
        }
    }

    fn parse_get_response(&self, response: Value) -> Option<FiscalReceipt> {
        let data = response.get("data").unwrap_or(&response);
        let document_id = string_field(data, "id_documento")?;

        Some(FiscalReceipt {
            id: document_id.clone(),
            order_id: string_field(data, "id_ordine").unwrap_or_default(),
            external_id: document_id,
            receipt_number: string_field(data, "numero_documento"),
            pdf_url: string_field(data, "url_pdf"),
            xml_data: string_field(data, "xml_data"),
            created_at: string_field(data, "data_creazione")
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
        })
    }

    fn parse_void_response(&self, external_id: &str, response: Value) -> FiscalProviderResult {
        let data = response.get("data").unwrap_or(&response);
        let receipt_number = string_field(data, "numero_documento")
            .or_else(|| string_field(data, "receipt_number"));
        FiscalProviderResult {
            receipt_number,
            ..FiscalProviderResult::ok(external_id)
        }
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
