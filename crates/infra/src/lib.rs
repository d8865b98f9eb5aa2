//! Infrastructure layer: queue stores, mail delivery, background worker and
//! configuration.

pub mod config;
pub mod mail;
pub mod queue;

pub use config::{AppConfig, CacheConfig, ConfigError, QueueBackend};
