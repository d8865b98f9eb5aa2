//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Defaults cover local
//! development; SMTP credentials and the sender address have no defaults and
//! are checked when the mailer is built.

use std::time::Duration;

use thiserror::Error;

use crate::mail::transport::SmtpConfig;

/// Configuration problem detected at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Which queue store backs the email queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Redis list (durable, shared between processes).
    Redis,
    /// Process-local store; tasks die with the process.
    Memory,
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub database: i64,
}

impl CacheConfig {
    /// Connection URL in the form `redis://[:password@]host:port/db`.
    ///
    /// The password is percent-encoded, so any byte is allowed in it.
    pub fn redis_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                encode_userinfo(&self.password),
                self.host,
                self.port,
                self.database
            )
        }
    }
}

/// Percent-encode everything but unreserved characters.
fn encode_userinfo(raw: &str) -> String {
    // form encoding writes a space as `+`; a literal `+` is already `%2B`.
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub queue_backend: QueueBackend,
    pub cache: CacheConfig,
    pub smtp: SmtpConfig,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let cache = CacheConfig {
            host: get("CACHE_HOST", "localhost"),
            port: parse_number("CACHE_PORT", &get("CACHE_PORT", "6379"))?,
            password: get("CACHE_PASSWORD", ""),
            database: parse_number("CACHE_DB_INDEX", &get("CACHE_DB_INDEX", "0"))?,
        };
        if cache.host.trim().is_empty() {
            return Err(ConfigError::Missing("CACHE_HOST"));
        }

        let smtp = SmtpConfig {
            host: get("EMAIL_SMTP_SERVER", "smtp.gmail.com"),
            port: parse_number("EMAIL_SMTP_PORT", &get("EMAIL_SMTP_PORT", "587"))?,
            username: get("EMAIL_SMTP_USERNAME", ""),
            password: get("EMAIL_SMTP_PASSWORD", ""),
            sender_address: get("EMAIL_SENDER_ADDRESS", ""),
            sender_name: get("EMAIL_SENDER_NAME", "mailqueue"),
            timeout: Duration::from_secs(parse_number(
                "EMAIL_SMTP_TIMEOUT_SECS",
                &get("EMAIL_SMTP_TIMEOUT_SECS", "30"),
            )?),
        };

        let queue_backend = match get("QUEUE_BACKEND", "redis").to_ascii_lowercase().as_str() {
            "redis" => QueueBackend::Redis,
            "memory" => QueueBackend::Memory,
            other => {
                return Err(ConfigError::invalid(
                    "QUEUE_BACKEND",
                    other,
                    "expected `redis` or `memory`",
                ));
            }
        };

        Ok(Self {
            server_port: parse_number("SERVER_PORT", &get("SERVER_PORT", "8080"))?,
            queue_backend,
            cache,
            smtp,
        })
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, raw, e.to_string()))
}
