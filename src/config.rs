//! Configuration
//!
//! Defaults suit a local single-tenant database; every field can be
//! overridden from the environment (a `.env` file is honoured by the binary).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::tag::TenantId;

pub const ENV_DATABASE: &str = "BILLING_TAGS_DB";
pub const ENV_BUSY_TIMEOUT_MS: &str = "BILLING_TAGS_BUSY_TIMEOUT_MS";
pub const ENV_EVENT_CAPACITY: &str = "BILLING_TAGS_EVENT_CAPACITY";
pub const ENV_TENANT: &str = "BILLING_TAGS_TENANT";

#[derive(Debug, Clone, PartialEq)]
pub struct TagStoreConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// How long a writer waits for a competing transaction
    pub busy_timeout: Duration,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
    pub default_tenant: TenantId,
    /// Filter used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for TagStoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("billing_tags.db"),
            busy_timeout: Duration::from_millis(5000),
            event_capacity: 1024,
            default_tenant: TenantId::DEFAULT,
            log_filter: "billing_tags=info".to_string(),
        }
    }
}

impl TagStoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATABASE) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, ENV_EVENT_CAPACITY) {
            if capacity == 0 {
                warn!("{} must be positive, keeping {}", ENV_EVENT_CAPACITY, config.event_capacity);
            } else {
                config.event_capacity = capacity;
            }
        }
        if let Some(tenant) = parse_var::<Uuid>(&lookup, ENV_TENANT) {
            config.default_tenant = TenantId(tenant);
        }

        config
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
