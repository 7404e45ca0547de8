//! Fiscal provider trait and shared HTTP orchestration.
//!
//! Every fiscal backend implements [`FiscalProvider`]. Cloud providers are
//! composed from a [`WireFormat`] (payload shaping and response parsing)
//! driven by the generic [`HttpProvider`], so the transport, timeout, and
//! error-mapping plumbing exists exactly once.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::{error, warn};

use crate::http::{FiscalApiError, HttpFiscalClient, DEFAULT_TIMEOUT, HEALTH_TIMEOUT};
use crate::types::{FiscalOrderData, FiscalProviderResult, FiscalReceipt, UNKNOWN_ERROR};

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Capability set every fiscal backend implements.
///
/// Ordinary failures populate `success: false` in the returned result; only
/// genuinely exceptional conditions surface as `Err` and are normalized by
/// the service layer before they reach callers.
#[async_trait]
pub trait FiscalProvider: Send + Sync {
    /// Provider name (for logging/display).
    fn name(&self) -> &str;

    /// Submit one order for fiscalization.
    async fn emit_receipt(
        &self,
        data: &FiscalOrderData,
    ) -> Result<FiscalProviderResult, FiscalApiError>;

    /// Lightweight liveness probe. Swallows all faults into `false`.
    async fn health_check(&self) -> bool;

    /// Look up a previously emitted receipt. Misses and faults return `None`.
    async fn get_receipt(&self, external_id: &str) -> Option<FiscalReceipt>;

    /// Cancel a previously emitted receipt (storno).
    async fn void_receipt(
        &self,
        external_id: &str,
    ) -> Result<FiscalProviderResult, FiscalApiError>;
}

/// Map a transport/API error into a normalized failure result.
pub fn result_from_error(err: FiscalApiError) -> FiscalProviderResult {
    match err {
        FiscalApiError::Api {
            message, code, raw, ..
        } => FiscalProviderResult {
            success: false,
            error: Some(message),
            error_code: code.or_else(|| Some(UNKNOWN_ERROR.to_string())),
            raw_response: raw,
            ..Default::default()
        },
        other => FiscalProviderResult::failure(other.to_string(), UNKNOWN_ERROR),
    }
}

// ---------------------------------------------------------------------------
// Wire format hooks
// ---------------------------------------------------------------------------

/// Per-provider payload shaping and response parsing.
///
/// Field names, nesting, and payment-method codes differ per provider; the
/// surrounding emit/get/void/health orchestration does not.
pub trait WireFormat: Send + Sync {
    /// Provider identifier sent in the `X-Provider` header.
    fn provider_id(&self) -> &'static str;

    /// Human-readable provider name.
    fn display_name(&self) -> &'static str;

    /// Shape the canonical order data into the provider's request body.
    fn receipt_payload(&self, data: &FiscalOrderData) -> Value;

    /// Parse the provider's emission response.
    fn parse_emit_response(&self, response: Value) -> FiscalProviderResult;

    /// Parse the provider's receipt-lookup response. `None` for misses.
    fn parse_get_response(&self, response: Value) -> Option<FiscalReceipt>;

    /// Parse the provider's void response.
    ///
    /// Default reads a flat `receipt_number` when present.
    fn parse_void_response(&self, external_id: &str, response: Value) -> FiscalProviderResult {
        let receipt_number = response
            .get("receipt_number")
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        FiscalProviderResult {
            receipt_number,
            ..FiscalProviderResult::ok(external_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Generic HTTP provider
// ---------------------------------------------------------------------------

/// Cloud fiscal provider: a [`WireFormat`] driven over [`HttpFiscalClient`].
pub struct HttpProvider<F: WireFormat> {
    format: F,
    client: HttpFiscalClient,
}

impl<F: WireFormat> HttpProvider<F> {
    pub fn new(format: F, endpoint: &str, api_key: &str) -> Self {
        let client = HttpFiscalClient::new(format.provider_id(), endpoint, api_key);
        Self { format, client }
    }
}

#[async_trait]
impl<F: WireFormat> FiscalProvider for HttpProvider<F> {
    fn name(&self) -> &str {
        self.format.display_name()
    }

    async fn emit_receipt(
        &self,
        data: &FiscalOrderData,
    ) -> Result<FiscalProviderResult, FiscalApiError> {
        let payload = self.format.receipt_payload(data);
        match self
            .client
            .request(Method::POST, "/receipts", Some(&payload), DEFAULT_TIMEOUT)
            .await
        {
            Ok(response) => Ok(self.format.parse_emit_response(response)),
            Err(err) => {
                warn!(
                    provider = self.format.provider_id(),
                    order_id = %data.order_id,
                    "receipt emission failed: {err}"
                );
                Ok(result_from_error(err))
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .request(Method::GET, "/health", None, HEALTH_TIMEOUT)
            .await
            .is_ok()
    }

    async fn get_receipt(&self, external_id: &str) -> Option<FiscalReceipt> {
        let path = format!("/receipts/{external_id}");
        match self
            .client
            .request(Method::GET, &path, None, DEFAULT_TIMEOUT)
            .await
        {
            Ok(response) => self.format.parse_get_response(response),
            Err(err) => {
                error!(
                    provider = self.format.provider_id(),
                    "failed to get receipt {external_id}: {err}"
                );
                None
            }
        }
    }

    async fn void_receipt(
        &self,
        external_id: &str,
    ) -> Result<FiscalProviderResult, FiscalApiError> {
        let path = format!("/receipts/{external_id}/void");
        match self
            .client
            .request(Method::POST, &path, None, DEFAULT_TIMEOUT)
            .await
        {
            Ok(response) => Ok(self.format.parse_void_response(external_id, response)),
            Err(err) => {
                warn!(
                    provider = self.format.provider_id(),
                    "void failed for {external_id}: {err}"
                );
                Ok(result_from_error(err))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BareFormat;

    impl WireFormat for BareFormat {
        fn provider_id(&self) -> &'static str {
            "bare"
        }
        fn display_name(&self) -> &'static str {
            "Bare"
        }
        fn receipt_payload(&self, _data: &FiscalOrderData) -> Value {
            Value::Null
        }
        fn parse_emit_response(&self, _response: Value) -> FiscalProviderResult {
            FiscalProviderResult::default()
        }
        fn parse_get_response(&self, _response: Value) -> Option<FiscalReceipt> {
            None
        }
    }

    #[test]
    fn test_result_from_api_error_keeps_code_and_raw() {
        let err = FiscalApiError::Api {
            message: "quota exceeded".into(),
            status: 429,
            code: Some("QUOTA".into()),
            raw: Some(json!({"code": "QUOTA"})),
        };
        let result = result_from_error(err);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("quota exceeded"));
        assert_eq!(result.error_code.as_deref(), Some("QUOTA"));
        assert!(result.raw_response.is_some());
    }

    #[test]
    fn test_result_from_api_error_without_code() {
        let err = FiscalApiError::Api {
            message: "bad".into(),
            status: 500,
            code: None,
            raw: None,
        };
        let result = result_from_error(err);
        assert_eq!(result.error_code.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn test_result_from_transport_error() {
        let result = result_from_error(FiscalApiError::Timeout("https://x".into()));
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(UNKNOWN_ERROR));
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_default_void_parse_reads_receipt_number() {
        let result =
            BareFormat.parse_void_response("EXT-9", json!({"receipt_number": "1042"}));
        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some("EXT-9"));
        assert_eq!(result.receipt_number.as_deref(), Some("1042"));
    }

    #[test]
    fn test_default_void_parse_tolerates_empty_body() {
        let result = BareFormat.parse_void_response("EXT-9", Value::Null);
        assert!(result.success);
        assert!(result.receipt_number.is_none());
    }
}
