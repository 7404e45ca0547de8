//! Fiscal system configuration.
//!
//! Environment-style configuration for the fiscal core. Missing API
//! credentials are not an error — they are the signal to fall back to the
//! mock provider, so a terminal without fiscal onboarding still runs.

use std::env;

/// A-Cube cloud fiscal API.
pub const PROVIDER_ACUBE: &str = "acube";
/// Fatture in Cloud API.
pub const PROVIDER_FATTURE_IN_CLOUD: &str = "fatture-in-cloud";
/// Epson RT printer (local transport, not implemented over HTTP).
pub const PROVIDER_EPSON: &str = "epson";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Process-wide fiscal configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FiscalConfig {
    /// Active provider name (`acube`, `fatture-in-cloud`, `epson`).
    pub provider: String,
    /// When false, emission is skipped and a synthetic `DISABLED-{order_id}`
    /// external id is returned.
    pub enabled: bool,
    /// Forces the mock provider regardless of provider name.
    pub mock_mode: bool,
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub retry_max_attempts: u32,
    pub retry_delay_seconds: u64,
    pub void_enabled: bool,
}

impl Default for FiscalConfig {
    fn default() -> Self {
        Self {
            provider: PROVIDER_ACUBE.to_string(),
            enabled: true,
            mock_mode: true,
            api_key: None,
            api_endpoint: None,
            retry_max_attempts: 3,
            retry_delay_seconds: 60,
            void_enabled: true,
        }
    }
}

impl FiscalConfig {
    /// Load configuration from `FISCAL_*` environment variables, with
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider: env_string("FISCAL_PROVIDER").unwrap_or(defaults.provider),
            enabled: env_flag("FISCAL_ENABLED").unwrap_or(defaults.enabled),
            mock_mode: env_flag("FISCAL_MOCK_MODE").unwrap_or(defaults.mock_mode),
            api_key: env_string("FISCAL_API_KEY"),
            api_endpoint: env_string("FISCAL_API_ENDPOINT"),
            retry_max_attempts: env_parse("FISCAL_RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry_max_attempts),
            retry_delay_seconds: env_parse("FISCAL_RETRY_DELAY_SECONDS")
                .unwrap_or(defaults.retry_delay_seconds),
            void_enabled: env_flag("FISCAL_VOID_ENABLED").unwrap_or(defaults.void_enabled),
        }
    }

    /// Both an API key and an endpoint are configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|s| !s.is_empty())
            && self.api_endpoint.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Merge a partial update into this configuration.
    pub fn apply(&mut self, update: FiscalConfigUpdate) {
        if let Some(provider) = update.provider {
            self.provider = provider;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(mock_mode) = update.mock_mode {
            self.mock_mode = mock_mode;
        }
        if let Some(api_key) = update.api_key {
            self.api_key = Some(api_key);
        }
        if let Some(api_endpoint) = update.api_endpoint {
            self.api_endpoint = Some(api_endpoint);
        }
        if let Some(attempts) = update.retry_max_attempts {
            self.retry_max_attempts = attempts;
        }
        if let Some(delay) = update.retry_delay_seconds {
            self.retry_delay_seconds = delay;
        }
        if let Some(void_enabled) = update.void_enabled {
            self.void_enabled = void_enabled;
        }
    }
}

/// Partial configuration update, merged by [`FiscalConfig::apply`].
#[derive(Debug, Clone, Default)]
pub struct FiscalConfigUpdate {
    pub provider: Option<String>,
    pub enabled: Option<bool>,
    pub mock_mode: Option<bool>,
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub retry_max_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub void_enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_string(name).map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
