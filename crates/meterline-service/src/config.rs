//! Service configuration.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use meterline_core::{BillingError, TokenRatio};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory. The in-memory store is used when
    /// unset or when the `rocksdb-backend` feature is off.
    pub data_dir: Option<String>,

    /// Service API key for metering calls (`x-api-key`).
    pub service_api_key: Option<String>,

    /// Admin API key for catalog writes (`x-admin-key`).
    pub admin_api_key: Option<String>,

    /// HS256 secret for end-user JWTs. User routes reject every request when
    /// unset.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT issuer (default: "meterline").
    pub auth_issuer: String,

    /// Expected JWT audience (default: "meterline").
    pub auth_audience: String,

    /// Secret for payment webhook signatures. Verification is skipped when
    /// unset.
    pub payment_webhook_secret: Option<String>,

    /// Mail API endpoint for settlement notifications.
    pub mail_api_url: Option<String>,

    /// Mail API bearer key.
    pub mail_api_key: Option<String>,

    /// Sender address for notifications.
    pub mail_from: String,

    /// Input:output token ratio used to price usage.
    pub token_ratio: TokenRatio,

    /// Settlement queue retry policy.
    pub settlement: RetryPolicy,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// How the settlement queue re-delivers a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries before an event is dead-lettered.
    pub max_attempts: u32,
    /// Wait before the first re-delivery.
    pub initial_backoff_ms: u64,
    /// Upper bound of the doubling backoff.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Wait before re-delivering after the `attempt`-th failed delivery
    /// (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut backoff_ms = self.initial_backoff_ms;
        for _ in 1..attempt {
            backoff_ms = backoff_ms.saturating_mul(2).min(self.max_backoff_ms);
        }
        Duration::from_millis(backoff_ms.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults with a warning, except
    /// `TOKEN_RATIO`, which must parse.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Configuration`] if `TOKEN_RATIO` is set but
    /// invalid.
    pub fn from_env() -> Result<Self, BillingError> {
        let defaults = Self::default();

        let token_ratio = match std::env::var("TOKEN_RATIO") {
            Ok(raw) => raw.parse::<TokenRatio>()?,
            Err(_) => defaults.token_ratio,
        };

        let settlement = RetryPolicy {
            max_attempts: env_parse("SETTLEMENT_MAX_ATTEMPTS", defaults.settlement.max_attempts)
                .max(1),
            initial_backoff_ms: env_parse(
                "SETTLEMENT_INITIAL_BACKOFF_MS",
                defaults.settlement.initial_backoff_ms,
            ),
            max_backoff_ms: env_parse(
                "SETTLEMENT_MAX_BACKOFF_MS",
                defaults.settlement.max_backoff_ms,
            ),
        };

        Ok(Self {
            listen_addr: env_string("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: env_string("DATA_DIR"),
            service_api_key: env_string("SERVICE_API_KEY"),
            admin_api_key: env_string("ADMIN_API_KEY"),
            auth_jwt_secret: env_string("AUTH_JWT_SECRET"),
            auth_issuer: env_string("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            auth_audience: env_string("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            payment_webhook_secret: env_string("PAYMENT_WEBHOOK_SECRET"),
            mail_api_url: env_string("MAIL_API_URL"),
            mail_api_key: env_string("MAIL_API_KEY"),
            mail_from: env_string("MAIL_FROM").unwrap_or(defaults.mail_from),
            token_ratio,
            settlement,
            cors_origins: env_string("CORS_ORIGINS").map_or(defaults.cors_origins, |origins| {
                origins.split(',').map(|s| s.trim().to_string()).collect()
            }),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        })
    }
}

/// A non-empty environment variable.
fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = env_string(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                variable = name,
                value = %raw,
                error = %e,
                default = %default,
                "Invalid configuration value, using default"
            );
            default
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: None,
            service_api_key: None,
            admin_api_key: None,
            auth_jwt_secret: None,
            auth_issuer: "meterline".into(),
            auth_audience: "meterline".into(),
            payment_webhook_secret: None,
            mail_api_url: None,
            mail_api_key: None,
            mail_from: "billing@meterline.local".into(),
            token_ratio: TokenRatio::default(),
            settlement: RetryPolicy::default(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
        }
    }
}
