//! Configuration for mailcade
//!
//! The whole configuration is read from the environment exactly once at
//! startup and frozen; components receive it by reference.

use crate::types::BucketClock;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Delivery pipeline configuration
    pub delivery: DeliveryConfig,

    /// Default outbound transport configuration
    pub transport: TransportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port for the API
    pub port: u16,

    /// Front-end origin, used for CORS and OAuth redirects
    pub frontend_origin: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum connections
    pub max_connections: u32,

    /// Minimum connections
    pub min_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign session tokens
    pub jwt_secret: String,

    /// Token lifetime in hours
    pub jwt_expiry_hours: i64,

    /// Google OAuth client id
    pub google_client_id: String,

    /// Google OAuth client secret
    pub google_client_secret: String,

    /// OAuth callback URL registered with Google
    pub google_callback_url: String,
}

/// Delivery pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum concurrent in-flight sends per worker process
    pub worker_concurrency: usize,

    /// Maximum delivery attempts per message
    pub max_retries: i32,

    /// Initial retry delay for exponential backoff (milliseconds)
    pub initial_retry_delay_ms: u64,

    /// Global sends allowed per calendar hour
    pub global_hourly_limit: i64,

    /// Per-sender sends allowed per calendar hour
    pub sender_hourly_limit: i64,

    /// Default inter-message delay when a request omits one (milliseconds)
    pub default_delay_ms: u64,

    /// Clock used for planner hour buckets
    pub bucket_clock: BucketClock,
}

/// Default outbound transport configuration, used when a sender carries
/// no private transport settings of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: String,
}

fn default_port() -> u16 {
    8080
}

fn default_frontend_origin() -> String {
    "http://localhost:5173".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_jwt_expiry_hours() -> i64 {
    24 * 7
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_max_retries() -> i32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    60_000
}

fn default_global_hourly_limit() -> i64 {
    500
}

fn default_sender_hourly_limit() -> i64 {
    100
}

fn default_delay_ms() -> u64 {
    30_000
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_log_level() -> String {
    "info,mailcade=debug".to_string()
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Tests feed a map
    /// here instead of mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> crate::Result<Self> {
        let server = ServerConfig {
            port: parse_or(&lookup, "PORT", default_port())?,
            frontend_origin: lookup("FRONTEND_ORIGIN").unwrap_or_else(default_frontend_origin),
        };

        let database = DatabaseConfig {
            url: required(&lookup, "DATABASE_URL")?,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", default_max_connections())?,
            min_connections: parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", default_min_connections())?,
        };

        let auth = AuthConfig {
            jwt_secret: required(&lookup, "JWT_SECRET")?,
            jwt_expiry_hours: parse_or(&lookup, "JWT_EXPIRY_HOURS", default_jwt_expiry_hours())?,
            google_client_id: lookup("GOOGLE_CLIENT_ID").unwrap_or_default(),
            google_client_secret: lookup("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            google_callback_url: lookup("GOOGLE_CALLBACK_URL").unwrap_or_default(),
        };

        let delivery = DeliveryConfig {
            worker_concurrency: parse_or(&lookup, "WORKER_CONCURRENCY", default_worker_concurrency())?,
            max_retries: parse_or(&lookup, "MAX_RETRIES", default_max_retries())?,
            initial_retry_delay_ms: parse_or(
                &lookup,
                "INITIAL_RETRY_DELAY_MS",
                default_initial_retry_delay_ms(),
            )?,
            global_hourly_limit: parse_or(&lookup, "GLOBAL_HOURLY_LIMIT", default_global_hourly_limit())?,
            sender_hourly_limit: parse_or(&lookup, "SENDER_HOURLY_LIMIT", default_sender_hourly_limit())?,
            default_delay_ms: parse_or(&lookup, "DEFAULT_DELAY_MS", default_delay_ms())?,
            bucket_clock: match lookup("BUCKET_CLOCK") {
                Some(raw) => raw.parse()?,
                None => BucketClock::default(),
            },
        };

        let transport = TransportConfig {
            host: lookup("SMTP_HOST").unwrap_or_else(default_smtp_host),
            port: parse_or(&lookup, "SMTP_PORT", default_smtp_port())?,
            secure: parse_or(&lookup, "SMTP_SECURE", false)?,
            user: lookup("SMTP_USER"),
            password: lookup("SMTP_PASSWORD"),
        };

        let logging = LoggingConfig {
            level: lookup("LOG_LEVEL").unwrap_or_else(default_log_level),
        };

        Ok(Config {
            server,
            database,
            auth,
            delivery,
            transport,
            logging,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> crate::Result<String> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| crate::Error::Config(format!("Missing required environment variable {}", key)))
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> crate::Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/mailcade"),
            ("JWT_SECRET", "test-secret"),
        ])
    }

    fn load(env: &HashMap<&str, &str>) -> crate::Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.delivery.worker_concurrency, 5);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.global_hourly_limit, 500);
        assert_eq!(config.delivery.bucket_clock, BucketClock::Utc);
        assert_eq!(config.transport.port, 587);
        assert!(!config.transport.secure);
    }

    #[test]
    fn test_missing_required() {
        let mut env = base_env();
        env.remove("DATABASE_URL");
        assert!(load(&env).is_err());

        let mut env = base_env();
        env.remove("JWT_SECRET");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut env = base_env();
        env.insert("PORT", "3000");
        env.insert("WORKER_CONCURRENCY", "12");
        env.insert("BUCKET_CLOCK", "local");
        env.insert("SMTP_SECURE", "true");

        let config = load(&env).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.delivery.worker_concurrency, 12);
        assert_eq!(config.delivery.bucket_clock, BucketClock::Local);
        assert!(config.transport.secure);
    }

    #[test]
    fn test_invalid_value() {
        let mut env = base_env();
        env.insert("PORT", "not-a-port");
        assert!(load(&env).is_err());
    }
}
