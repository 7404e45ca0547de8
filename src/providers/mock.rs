//! Mock fiscal provider.
//!
//! Simulates a cloud fiscal backend without network access: artificial
//! latency, configurable failure injection, an in-memory receipt map, and a
//! synthesized XML receipt document. Used whenever no real provider is
//! configured, so the rest of the POS exercises its async/loading and
//! error/retry paths realistically.

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::http::FiscalApiError;
use crate::provider::FiscalProvider;
use crate::types::{
    FiscalOrderData, FiscalProviderResult, FiscalReceipt, NOT_FOUND, SERVICE_UNAVAILABLE,
};

/// Mock receipt numbers start here and increase monotonically per session.
const RECEIPT_COUNTER_SEED: u64 = 1000;

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Fault-injection and latency knobs for the mock provider.
///
/// The default failure rates are deliberate chaos to exercise error and
/// retry paths during development; tests use [`MockFiscalProvider::deterministic`]
/// to force them off.
#[derive(Debug, Clone)]
pub struct MockTuning {
    /// Probability that an emission fails with `SERVICE_UNAVAILABLE`.
    pub emit_failure_rate: f64,
    /// Probability that a health check reports down.
    pub health_failure_rate: f64,
    /// Simulate network latency (500-2000ms emit, 200ms health, 300ms
    /// lookup, 500ms void).
    pub simulate_latency: bool,
}

impl Default for MockTuning {
    fn default() -> Self {
        Self {
            emit_failure_rate: 0.10,
            health_failure_rate: 0.05,
            simulate_latency: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// In-memory fiscal provider simulator.
pub struct MockFiscalProvider {
    tuning: MockTuning,
    receipt_counter: AtomicU64,
    receipts: Mutex<HashMap<String, FiscalReceipt>>,
}

impl MockFiscalProvider {
    pub fn new() -> Self {
        Self::with_tuning(MockTuning::default())
    }

    pub fn with_tuning(tuning: MockTuning) -> Self {
        Self {
            tuning,
            receipt_counter: AtomicU64::new(RECEIPT_COUNTER_SEED),
            receipts: Mutex::new(HashMap::new()),
        }
    }

    /// No latency, no injected failures. For tests and CI.
    pub fn deterministic() -> Self {
        Self::with_tuning(MockTuning {
            emit_failure_rate: 0.0,
            health_failure_rate: 0.0,
            simulate_latency: false,
        })
    }

    async fn delay(&self, ms: u64) {
        if self.tuning.simulate_latency {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn chance(rate: f64) -> bool {
        rate > 0.0 && rand::thread_rng().gen_bool(rate.clamp(0.0, 1.0))
    }

    fn next_external_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect();
        format!(
            "MOCK-{}-{}",
            Utc::now().timestamp_millis(),
            suffix.to_lowercase()
        )
    }
}

impl Default for MockFiscalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FiscalProvider for MockFiscalProvider {
    fn name(&self) -> &str {
        "MockFiscalProvider"
    }

    async fn emit_receipt(
        &self,
        data: &FiscalOrderData,
    ) -> Result<FiscalProviderResult, FiscalApiError> {
        // Draw the jitter and the failure branch before the first await so
        // the thread-local RNG never lives across a suspension point.
        let jitter_ms = rand::thread_rng().gen_range(500..=2000);
        let inject_failure = Self::chance(self.tuning.emit_failure_rate);

        self.delay(jitter_ms).await;

        if inject_failure {
            return Ok(FiscalProviderResult::failure(
                "Simulated API error: Service temporarily unavailable",
                SERVICE_UNAVAILABLE,
            ));
        }

        let receipt_number = self
            .receipt_counter
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let external_id = Self::next_external_id();
        let pdf_url = format!("https://example.com/receipts/{external_id}.pdf");

        let receipt = FiscalReceipt {
            id: Uuid::new_v4().to_string(),
            order_id: data.order_id.clone(),
            external_id: external_id.clone(),
            receipt_number: Some(receipt_number.clone()),
            pdf_url: Some(pdf_url.clone()),
            xml_data: Some(mock_receipt_xml(data, &external_id, &receipt_number)),
            created_at: Utc::now().to_rfc3339(),
        };

        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external_id.clone(), receipt);

        debug!(order_id = %data.order_id, external_id = %external_id, "mock receipt emitted");

        Ok(FiscalProviderResult {
            receipt_number: Some(receipt_number),
            pdf_url: Some(pdf_url),
            ..FiscalProviderResult::ok(external_id)
        })
    }

    async fn health_check(&self) -> bool {
        let down = Self::chance(self.tuning.health_failure_rate);
        self.delay(200).await;
        !down
    }

    async fn get_receipt(&self, external_id: &str) -> Option<FiscalReceipt> {
        self.delay(300).await;
        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_id)
            .cloned()
    }

    async fn void_receipt(
        &self,
        external_id: &str,
    ) -> Result<FiscalProviderResult, FiscalApiError> {
        self.delay(500).await;

        let removed = self
            .receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(external_id);

        match removed {
            Some(receipt) => Ok(FiscalProviderResult {
                receipt_number: receipt.receipt_number,
                ..FiscalProviderResult::ok(external_id)
            }),
            None => Ok(FiscalProviderResult::failure(
                "Receipt not found",
                NOT_FOUND,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Mock XML synthesis
// ---------------------------------------------------------------------------

/// Synthesize a structured XML receipt document.
///
/// Per-line VAT split is `vat = total * rate / (100 + rate)`. Purely for
/// realism; never validated against a schema.
fn mock_receipt_xml(data: &FiscalOrderData, external_id: &str, receipt_number: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<FiscalReceipt xmlns=\"http://www.fiscal.it/schema/receipt\">\n");
    xml.push_str("  <Header>\n");
    xml.push_str(&format!(
        "    <ReceiptNumber>{receipt_number}</ReceiptNumber>\n"
    ));
    xml.push_str(&format!("    <ExternalId>{external_id}</ExternalId>\n"));
    xml.push_str(&format!("    <DateTime>{}</DateTime>\n", data.timestamp));
    xml.push_str(&format!(
        "    <PaymentMethod>{}</PaymentMethod>\n",
        data.payment_method.as_str()
    ));
    xml.push_str("  </Header>\n");
    xml.push_str("  <Items>\n");

    for item in &data.items {
        let rate = item.vat_rate as f64;
        let vat = item.total_price as f64 * rate / (100.0 + rate);
        let net = item.total_price as f64 - vat;
        xml.push_str("    <Line>\n");
        xml.push_str(&format!(
            "      <Description>{}</Description>\n",
            escape_xml(&item.name)
        ));
        xml.push_str(&format!("      <Quantity>{}</Quantity>\n", item.quantity));
        xml.push_str(&format!(
            "      <UnitPrice>{:.2}</UnitPrice>\n",
            item.unit_price as f64 / 100.0
        ));
        xml.push_str(&format!("      <NetAmount>{:.2}</NetAmount>\n", net / 100.0));
        xml.push_str(&format!("      <VatAmount>{:.2}</VatAmount>\n", vat / 100.0));
        xml.push_str(&format!("      <VatRate>{}</VatRate>\n", item.vat_rate));
        xml.push_str("    </Line>\n");
    }

    xml.push_str("  </Items>\n");
    xml.push_str("  <Totals>\n");
    xml.push_str(&format!(
        "    <TotalAmount>{:.2}</TotalAmount>\n",
        data.total_amount as f64 / 100.0
    ));
    xml.push_str(&format!(
        "    <TotalVat>{:.2}</TotalVat>\n",
        data.total_vat as f64 / 100.0
    ));
    xml.push_str("  </Totals>\n");
    xml.push_str("</FiscalReceipt>");
    xml
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FiscalOrderItem, PaymentMethod};

    fn sample_order(order_id: &str) -> FiscalOrderData {
        FiscalOrderData {
            order_id: order_id.into(),
            customer_name: None,
            items: vec![FiscalOrderItem {
                product_id: "p1".into(),
                name: "Caffè & <Brioche>".into(),
                quantity: 2,
                unit_price: 850,
                total_price: 1700,
                vat_rate: 22,
                category: None,
            }],
            total_amount: 1700,
            total_vat: 306,
            payment_method: PaymentMethod::Cash,
            timestamp: "2026-08-24T09:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_emit_returns_external_id() {
        let provider = MockFiscalProvider::deterministic();
        let result = provider.emit_receipt(&sample_order("ord-1")).await.unwrap();
        assert!(result.success);
        let external_id = result.external_id.unwrap();
        assert!(external_id.starts_with("MOCK-"));
        assert!(result.receipt_number.is_some());
        assert!(result.pdf_url.unwrap().ends_with(".pdf"));
    }

    #[tokio::test]
    async fn test_forced_failure_yields_service_unavailable() {
        let provider = MockFiscalProvider::with_tuning(MockTuning {
            emit_failure_rate: 1.0,
            health_failure_rate: 1.0,
            simulate_latency: false,
        });
        let result = provider.emit_receipt(&sample_order("ord-1")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(SERVICE_UNAVAILABLE));
        assert!(!provider.health_check().await);
    }

    #[tokio::test]
    async fn test_emit_then_get_round_trip() {
        let provider = MockFiscalProvider::deterministic();
        let result = provider.emit_receipt(&sample_order("ord-7")).await.unwrap();
        let external_id = result.external_id.unwrap();

        let receipt = provider.get_receipt(&external_id).await.unwrap();
        assert_eq!(receipt.order_id, "ord-7");
        assert_eq!(receipt.external_id, external_id);

        // Lookup is idempotent
        let again = provider.get_receipt(&external_id).await.unwrap();
        assert_eq!(receipt, again);
    }

    #[tokio::test]
    async fn test_void_removes_retrievability() {
        let provider = MockFiscalProvider::deterministic();
        let result = provider.emit_receipt(&sample_order("ord-9")).await.unwrap();
        let external_id = result.external_id.unwrap();
        let receipt_number = result.receipt_number.unwrap();

        let voided = provider.void_receipt(&external_id).await.unwrap();
        assert!(voided.success);
        assert_eq!(voided.receipt_number.as_deref(), Some(&*receipt_number));

        assert!(provider.get_receipt(&external_id).await.is_none());
    }

    #[tokio::test]
    async fn test_void_missing_is_not_found() {
        let provider = MockFiscalProvider::deterministic();
        let result = provider.void_receipt("MOCK-nope").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(NOT_FOUND));
    }

    #[tokio::test]
    async fn test_receipt_numbers_increase() {
        let provider = MockFiscalProvider::deterministic();
        let a = provider.emit_receipt(&sample_order("a")).await.unwrap();
        let b = provider.emit_receipt(&sample_order("b")).await.unwrap();
        let na: u64 = a.receipt_number.unwrap().parse().unwrap();
        let nb: u64 = b.receipt_number.unwrap().parse().unwrap();
        assert_eq!(na, RECEIPT_COUNTER_SEED);
        assert_eq!(nb, na + 1);
    }

    #[tokio::test]
    async fn test_health_check_healthy_when_no_injection() {
        let provider = MockFiscalProvider::deterministic();
        assert!(provider.health_check().await);
    }

    #[test]
    fn test_mock_xml_structure() {
        let xml = mock_receipt_xml(&sample_order("ord-1"), "MOCK-1-abc", "1000");
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<ReceiptNumber>1000</ReceiptNumber>"));
        assert!(xml.contains("<ExternalId>MOCK-1-abc</ExternalId>"));
        // Ampersand and angle brackets must be escaped
        assert!(xml.contains("Caffè &amp; &lt;Brioche&gt;"));
        assert!(xml.contains("<TotalAmount>17.00</TotalAmount>"));
        assert!(xml.contains("<TotalVat>3.06</TotalVat>"));
        // 22% VAT split on 17.00 gross: 3.07 VAT / 13.93 net per the
        // continuous formula (no per-line rounding in the document)
        assert!(xml.contains("<VatRate>22</VatRate>"));
        assert!(xml.contains("<PaymentMethod>cash</PaymentMethod>"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a&b<c>\"d\"'e'"), "a&amp;b&lt;c&gt;&quot;d&quot;&apos;e&apos;");
    }
}
