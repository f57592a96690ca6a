//! Typed settings for every caplife component
//!
//! Durations are stored as milliseconds so the serialized form stays plain
//! JSON numbers; accessors hand out `Duration`s. Every struct has defaults so
//! a partial file only overrides what it names.

use caplife_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Settings for the whole process, immutable once loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Defaults for caches that have no settings of their own
    pub cache: CacheSettings,
    pub agent: AgentSettings,
    pub refresh: RefreshSettings,
    pub store: StoreSettings,
    pub log: LogSettings,
}

/// Settings for one rotating cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// How long a record lives in its slot
    pub ttl_ms: u64,
    /// How long before the TTL a replacement is computed; 0 disables rotation
    pub rotation_margin_ms: u64,
    /// Upper bound on live keys
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: HOUR_MS,
            rotation_margin_ms: 5 * MINUTE_MS,
            max_entries: 1000,
        }
    }
}

impl CacheSettings {
    pub fn new(ttl: Duration, rotation_margin: Duration, max_entries: usize) -> Self {
        Self {
            ttl_ms: millis(ttl),
            rotation_margin_ms: millis(rotation_margin),
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn rotation_margin(&self) -> Duration {
        Duration::from_millis(self.rotation_margin_ms)
    }

    /// Age at which a record starts rotating, if rotation is enabled
    pub fn rotation_delay(&self) -> Option<Duration> {
        if self.rotation_margin_ms == 0 || self.rotation_margin_ms >= self.ttl_ms {
            None
        } else {
            Some(self.ttl() - self.rotation_margin())
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(invalid(section, "ttl_ms must be greater than zero"));
        }
        if self.max_entries == 0 {
            return Err(invalid(section, "max_entries must be greater than zero"));
        }
        if self.rotation_margin_ms >= self.ttl_ms {
            return Err(invalid(
                section,
                "rotation_margin_ms must be smaller than ttl_ms (use 0 to disable rotation)",
            ));
        }
        Ok(())
    }
}

/// Settings for ephemeral agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Ceiling for any capability delegated to an ephemeral agent
    pub max_lifetime_ms: u64,
    pub cache: CacheSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_lifetime_ms: DAY_MS,
            cache: CacheSettings::default(),
        }
    }
}

impl AgentSettings {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }
}

/// Settings for the capability refresh engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Used when the policy carries no `maxTtlBeforeRefresh`
    pub default_max_ttl_before_refresh_ms: u64,
    pub clock_skew_ms: u64,
    /// Delay before retrying after a transient policy failure
    pub transient_retry_delay_ms: u64,
    /// The next attempt is never scheduled sooner than this from now
    pub safety_floor_ms: u64,
    /// Capabilities refreshed at once
    pub concurrency: usize,
    /// Refresh requests started per rate window
    pub rate_limit: usize,
    pub rate_window_ms: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            default_max_ttl_before_refresh_ms: 15 * DAY_MS,
            clock_skew_ms: 5 * MINUTE_MS,
            transient_retry_delay_ms: DAY_MS,
            safety_floor_ms: 5 * MINUTE_MS,
            concurrency: 4,
            rate_limit: 60,
            rate_window_ms: 1000,
        }
    }
}

impl RefreshSettings {
    pub fn default_max_ttl_before_refresh(&self) -> Duration {
        Duration::from_millis(self.default_max_ttl_before_refresh_ms)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_millis(self.clock_skew_ms)
    }

    pub fn transient_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transient_retry_delay_ms)
    }

    pub fn safety_floor(&self) -> Duration {
        Duration::from_millis(self.safety_floor_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}

/// Settings for document stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub read_cache_capacity: usize,
    pub read_cache_ttl_ms: u64,
    /// Conditional-write retries before giving up
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Cache of per-tenant store handles
    pub client_cache: CacheSettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            read_cache_capacity: 100,
            read_cache_ttl_ms: 5000,
            max_retries: 10,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 1000,
            client_cache: CacheSettings::default(),
        }
    }
}

impl StoreSettings {
    pub fn read_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.read_cache_ttl_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        self.cache.validate("cache")?;
        self.agent.cache.validate("agent.cache")?;
        self.store.client_cache.validate("store.client_cache")?;

        if self.agent.max_lifetime_ms == 0 {
            return Err(invalid("agent", "max_lifetime_ms must be greater than zero"));
        }
        if self.refresh.concurrency == 0 {
            return Err(invalid("refresh", "concurrency must be greater than zero"));
        }
        if self.refresh.rate_limit == 0 || self.refresh.rate_window_ms == 0 {
            return Err(invalid(
                "refresh",
                "rate_limit and rate_window_ms must be greater than zero",
            ));
        }
        if self.store.read_cache_capacity == 0 {
            return Err(invalid("store", "read_cache_capacity must be greater than zero"));
        }
        if self.store.retry_base_delay_ms > self.store.retry_max_delay_ms {
            return Err(invalid(
                "store",
                "retry_base_delay_ms must not exceed retry_max_delay_ms",
            ));
        }
        Ok(())
    }
}

fn invalid(section: &str, message: &str) -> Error {
    Error::configuration(format!("[{section}] {message}"))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
