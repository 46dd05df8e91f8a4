use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use vestry_core::util::{is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub replica_url: Option<String>,
    pub replica_auth_token: Option<String>,
    /// HS256 secret for optional bearer-token actor attribution
    pub identity_jwt_secret: Option<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_per_window: u64,
    /// Minor units; financial entries at or above this page admins
    pub high_value_threshold: i64,
    pub delivery_webhook_url: Option<String>,
    /// Honor `x-forwarded-for` when resolving client addresses. Only
    /// enable behind a proxy that strips the inbound header.
    pub trust_forwarded_for: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("replica_url", &self.replica_url)
            .field(
                "replica_auth_token",
                &self.replica_auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "identity_jwt_secret",
                &self.identity_jwt_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_per_window", &self.rate_limit_per_window)
            .field("high_value_threshold", &self.high_value_threshold)
            .field("delivery_webhook_url", &self.delivery_webhook_url)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "VESTRY_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = value_or_default(&lookup, "VESTRY_DB_PATH", "vestry.db");

        let replica_url = normalize_text_option(lookup("VESTRY_REPLICA_URL"));
        let replica_auth_token = normalize_text_option(lookup("VESTRY_REPLICA_AUTH_TOKEN"));
        if replica_url.is_some() != replica_auth_token.is_some() {
            return Err(ConfigError::Invalid(
                "VESTRY_REPLICA_URL and VESTRY_REPLICA_AUTH_TOKEN must be set together".to_string(),
            ));
        }

        let identity_jwt_secret = normalize_text_option(lookup("VESTRY_IDENTITY_JWT_SECRET"));

        let rate_limit_window = Duration::from_secs(parse_u64(
            &lookup,
            "VESTRY_RATE_LIMIT_WINDOW_SECS",
            60,
        )?);
        let rate_limit_per_window = parse_u64(&lookup, "VESTRY_RATE_LIMIT_PER_WINDOW", 100)?;
        if rate_limit_per_window == 0 {
            return Err(ConfigError::Invalid(
                "VESTRY_RATE_LIMIT_PER_WINDOW must be greater than zero".to_string(),
            ));
        }

        let high_value_threshold = parse_i64(&lookup, "VESTRY_HIGH_VALUE_THRESHOLD", 1_000_000)?;

        let delivery_webhook_url = normalize_text_option(lookup("VESTRY_DELIVERY_WEBHOOK_URL"));
        if let Some(url) = &delivery_webhook_url {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "VESTRY_DELIVERY_WEBHOOK_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        let trust_forwarded_for = parse_bool(&lookup, "VESTRY_TRUST_FORWARDED_FOR", false)?;

        Ok(Self {
            bind_addr,
            db_path,
            replica_url,
            replica_auth_token,
            identity_jwt_secret,
            rate_limit_window,
            rate_limit_per_window,
            high_value_threshold,
            delivery_webhook_url,
            trust_forwarded_for,
        })
    }
}

fn value_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
) -> String {
    normalize_text_option(lookup(name)).unwrap_or_else(|| default.to_string())
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match normalize_text_option(lookup(name)) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer"))),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match normalize_text_option(lookup(name)) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid(format!("{name} must be true or false"))),
        },
    }
}

fn parse_i64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    match normalize_text_option(lookup(name)) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer"))),
    }
}
