//! Process-wide configuration.
//!
//! Built once at startup from the environment (a `.env` file is honoured) and
//! handed to each component explicitly. Missing gateway credentials are a hard
//! error: nothing downstream can recover from them.

use chrono::FixedOffset;
use std::time::Duration;
use url::Url;

pub const SANDBOX_BASE_URL: &str = "https://payment-stage.ecpay.com.tw";
pub const PRODUCTION_BASE_URL: &str = "https://payment.ecpay.com.tw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEnvironment {
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_BASE_URL,
            Self::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl std::str::FromStr for GatewayEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "stage" | "test" => Ok(Self::Sandbox),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Invalid("ECPAY_ENV".into(), other.to_string())),
        }
    }
}

/// Merchant credentials and endpoint settings for the payment gateway.
///
/// `Debug` redacts both hash secrets.
#[derive(Clone)]
pub struct GatewayConfig {
    pub merchant_id: String,
    pub hash_key: String,
    pub hash_iv: String,
    pub environment: GatewayEnvironment,
    /// Gateway host; the checkout and query paths are appended to it.
    pub base_url: Url,
    /// Upper bound on a single trade-status query.
    pub timeout: Duration,
    /// Offset used to render `MerchantTradeDate`.
    pub trade_date_offset: FixedOffset,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("merchant_id", &self.merchant_id)
            .field("hash_key", &"[REDACTED]")
            .field("hash_iv", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("trade_date_offset", &self.trade_date_offset)
            .finish()
    }
}

impl GatewayConfig {
    /// Builds a sandbox configuration with the default timeout and trade-date offset.
    pub fn sandbox(merchant_id: &str, hash_key: &str, hash_iv: &str) -> Result<Self, ConfigError> {
        let config = Self {
            merchant_id: merchant_id.to_string(),
            hash_key: hash_key.to_string(),
            hash_iv: hash_iv.to_string(),
            environment: GatewayEnvironment::Sandbox,
            base_url: parse_url("ECPAY_BASE_URL", SANDBOX_BASE_URL)?,
            timeout: Duration::from_secs(5),
            trade_date_offset: taipei_offset()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects blank credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merchant_id.trim().is_empty() {
            return Err(ConfigError::Missing("ECPAY_MERCHANT_ID"));
        }
        if self.hash_key.is_empty() {
            return Err(ConfigError::Missing("ECPAY_HASH_KEY"));
        }
        if self.hash_iv.is_empty() {
            return Err(ConfigError::Missing("ECPAY_HASH_IV"));
        }
        Ok(())
    }

    /// Variables:
    /// - `ECPAY_MERCHANT_ID`, `ECPAY_HASH_KEY`, `ECPAY_HASH_IV` (required)
    /// - `ECPAY_ENV` (default: `sandbox`)
    /// - `ECPAY_BASE_URL` (default: derived from `ECPAY_ENV`)
    /// - `ECPAY_TIMEOUT_SECS` (default: 5)
    /// - `ECPAY_TRADE_DATE_UTC_OFFSET` in hours (default: 8)
    pub fn from_env() -> Result<Self, ConfigError> {
        let merchant_id = require("ECPAY_MERCHANT_ID")?;
        let hash_key = require("ECPAY_HASH_KEY")?;
        let hash_iv = require("ECPAY_HASH_IV")?;

        let environment = match std::env::var("ECPAY_ENV") {
            Ok(raw) => raw.parse()?,
            Err(_) => GatewayEnvironment::Sandbox,
        };
        let base_url = match std::env::var("ECPAY_BASE_URL") {
            Ok(raw) => parse_url("ECPAY_BASE_URL", &raw)?,
            Err(_) => parse_url("ECPAY_BASE_URL", environment.default_base_url())?,
        };
        let timeout = Duration::from_secs(
            std::env::var("ECPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        );
        let trade_date_offset = match std::env::var("ECPAY_TRADE_DATE_UTC_OFFSET") {
            Ok(raw) => {
                let hours: i32 = raw.trim().parse().map_err(|_| {
                    ConfigError::Invalid("ECPAY_TRADE_DATE_UTC_OFFSET".into(), raw.clone())
                })?;
                FixedOffset::east_opt(hours * 3600)
                    .ok_or_else(|| ConfigError::Invalid("ECPAY_TRADE_DATE_UTC_OFFSET".into(), raw))?
            }
            Err(_) => taipei_offset()?,
        };

        let config = Self {
            merchant_id,
            hash_key,
            hash_iv,
            environment,
            base_url,
            timeout,
            trade_date_offset,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Everything the binary needs: gateway settings plus the storefront's own addresses.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    /// Externally reachable root used to build the gateway's return URLs.
    pub public_base_url: Url,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let gateway = GatewayConfig::from_env()?;
        let public_base_url = parse_url(
            "STOREFRONT_BASE_URL",
            &std::env::var("STOREFRONT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
        )?;
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        tracing::info!(
            merchant_id = %gateway.merchant_id,
            environment = ?gateway.environment,
            "Configuration loaded"
        );

        Ok(Self {
            gateway,
            public_base_url,
            bind_addr,
        })
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(var)),
    }
}

fn parse_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

fn taipei_offset() -> Result<FixedOffset, ConfigError> {
    FixedOffset::east_opt(8 * 3600)
        .ok_or_else(|| ConfigError::Invalid("ECPAY_TRADE_DATE_UTC_OFFSET".into(), "8".into()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
}
