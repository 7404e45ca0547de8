//! HTTP transport shared by the cloud fiscal providers.
//!
//! Wraps reqwest with bearer auth, a provider-identifying header,
//! per-request timeouts, and structured error mapping, so the wire formats
//! only deal in JSON values.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Default timeout for fiscal API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used for the lightweight health check.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level or API-level fault from a fiscal provider call.
///
/// `Api` carries the provider's structured error body; the other variants
/// are network faults mapped from reqwest. Ordinary "the provider said no"
/// outcomes are converted into `FiscalProviderResult` failures by the
/// provider layer and never travel as this type to callers of the service.
#[derive(Debug, thiserror::Error)]
pub enum FiscalApiError {
    #[error("{message} (HTTP {status})")]
    Api {
        message: String,
        status: u16,
        code: Option<String>,
        raw: Option<Value>,
    },
    #[error("cannot reach fiscal endpoint at {0}")]
    Connect(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("network error communicating with {0}: {1}")]
    Network(String, String),
    #[error("invalid JSON from fiscal provider: {0}")]
    InvalidBody(String),
}

impl FiscalApiError {
    fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FiscalApiError::Timeout(url.to_string())
        } else if err.is_connect() {
            FiscalApiError::Connect(url.to_string())
        } else {
            FiscalApiError::Network(url.to_string(), err.to_string())
        }
    }
}

/// Convert an HTTP status code into a fallback message when the error body
/// carries none.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Fiscal API key is invalid or expired".to_string(),
        403 => "Fiscal operation not authorized".to_string(),
        404 => "Fiscal endpoint not found".to_string(),
        s if s >= 500 => format!("Fiscal provider server error (HTTP {s})"),
        s => format!("Unexpected response from fiscal provider (HTTP {s})"),
    }
}

/// Parse a non-2xx response body into a structured API error.
///
/// Unparseable bodies fall back to an empty object rather than failing.
fn parse_error_body(status: StatusCode, body: &str) -> FiscalApiError {
    let raw: Value =
        serde_json::from_str(body).unwrap_or_else(|_| Value::Object(Default::default()));
    let message = raw
        .get("message")
        .or_else(|| raw.get("error"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| status_message(status));
    let code = raw
        .get("code")
        .or_else(|| raw.get("error_code"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    FiscalApiError::Api {
        message,
        status: status.as_u16(),
        code,
        raw: Some(raw),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Authenticated HTTP client for one fiscal provider endpoint.
pub struct HttpFiscalClient {
    endpoint: String,
    api_key: String,
    provider_id: &'static str,
    client: Client,
}

impl HttpFiscalClient {
    pub fn new(provider_id: &'static str, endpoint: &str, api_key: &str) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            api_key: api_key.to_string(),
            provider_id,
            client: Client::new(),
        }
    }

    /// Perform a request against the provider API.
    ///
    /// `path` includes the leading slash, e.g. `/receipts`. Non-2xx
    /// responses become [`FiscalApiError::Api`]; empty 2xx bodies become
    /// `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, FiscalApiError> {
        let url = format!("{}{path}", self.endpoint);

        let mut req = self
            .client
            .request(method, &url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Provider", self.provider_id);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FiscalApiError::from_reqwest(&url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(parse_error_body(status, &body_text));
        }

        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| FiscalApiError::InvalidBody(e.to_string()))
    }
}

/// Strip trailing slashes so `{endpoint}{path}` composes cleanly.
fn normalize_endpoint(endpoint: &str) -> String {
    let mut url = endpoint.trim().to_string();
    while url.ends_with('/') {
        url.pop();
    }
    url
}

// ---------------------------------------------------------------------------
// Currency conversion
// ---------------------------------------------------------------------------

/// Convert a decimal EUR amount to cents.
pub fn euros_to_cents(euros: f64) -> i64 {
    (euros * 100.0).round() as i64
}

/// Convert cents to a decimal EUR amount.
pub fn cents_to_euros(cents: i64) -> f64 {
    cents as f64 / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("https://api.example.com/"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_endpoint("  https://api.example.com//  "),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_endpoint("https://api.example.com"),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_currency_conversion() {
        assert_eq!(euros_to_cents(8.50), 850);
        assert_eq!(euros_to_cents(0.005), 1);
        assert_eq!(euros_to_cents(0.0), 0);
        assert!((cents_to_euros(1700) - 17.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_error_body_structured() {
        let err = parse_error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"invalid vat rate","code":"VAT_INVALID"}"#,
        );
        match err {
            FiscalApiError::Api {
                message,
                status,
                code,
                raw,
            } => {
                assert_eq!(message, "invalid vat rate");
                assert_eq!(status, 422);
                assert_eq!(code.as_deref(), Some("VAT_INVALID"));
                assert!(raw.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_body_unparseable_falls_back() {
        let err = parse_error_body(StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>");
        match err {
            FiscalApiError::Api {
                message,
                status,
                code,
                raw,
            } => {
                assert!(message.contains("HTTP 500"));
                assert_eq!(status, 500);
                assert!(code.is_none());
                // Fallback is an empty object, not None
                assert_eq!(raw, Some(Value::Object(Default::default())));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_message_mapping() {
        assert!(status_message(StatusCode::UNAUTHORIZED).contains("invalid or expired"));
        assert!(status_message(StatusCode::FORBIDDEN).contains("not authorized"));
        assert!(status_message(StatusCode::BAD_GATEWAY).contains("server error"));
    }
}
