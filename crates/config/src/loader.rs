//! Settings loader for caplife
//!
//! Precedence, lowest to highest: built-in defaults, an optional JSON file,
//! `CAPLIFE_*` environment variables. The result is validated before it is
//! handed out.

use crate::settings::Settings;
use caplife_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "CAPLIFE_";

/// Loader that assembles [`Settings`] at startup
#[derive(Debug, Default)]
pub struct SettingsLoader {
    /// Optional JSON file with settings
    file: Option<PathBuf>,
    /// Whether to apply `CAPLIFE_*` overrides
    use_env: bool,
}

impl SettingsLoader {
    /// Create a loader that only yields defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from a JSON file
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Apply `CAPLIFE_*` environment overrides
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Load and validate the settings
    pub fn load(self) -> Result<Settings> {
        let mut settings = match &self.file {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        if self.use_env {
            settings.apply_overrides(std::env::vars())?;
        }

        settings.validate()?;
        tracing::debug!(file = ?self.file, env = self.use_env, "settings loaded");
        Ok(settings)
    }
}

impl Settings {
    /// Parse settings from JSON; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid settings JSON: {e}")))
    }

    /// Read settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read settings file '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Apply `CAPLIFE_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `CAPLIFE_*` overrides from arbitrary key/value pairs
    ///
    /// Unknown `CAPLIFE_*` keys are ignored with a warning; values that fail
    /// to parse are errors.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match name {
                "LOG" => self.log.filter = value.to_string(),
                "CACHE_TTL_MS" => self.cache.ttl_ms = parse(&key, value)?,
                "CACHE_ROTATION_MARGIN_MS" => self.cache.rotation_margin_ms = parse(&key, value)?,
                "CACHE_MAX_ENTRIES" => self.cache.max_entries = parse(&key, value)?,
                "AGENT_MAX_LIFETIME_MS" => self.agent.max_lifetime_ms = parse(&key, value)?,
                "AGENT_CACHE_TTL_MS" => self.agent.cache.ttl_ms = parse(&key, value)?,
                "AGENT_CACHE_ROTATION_MARGIN_MS" => {
                    self.agent.cache.rotation_margin_ms = parse(&key, value)?
                }
                "REFRESH_MAX_TTL_BEFORE_REFRESH_MS" => {
                    self.refresh.default_max_ttl_before_refresh_ms = parse(&key, value)?
                }
                "REFRESH_CLOCK_SKEW_MS" => self.refresh.clock_skew_ms = parse(&key, value)?,
                "REFRESH_TRANSIENT_RETRY_DELAY_MS" => {
                    self.refresh.transient_retry_delay_ms = parse(&key, value)?
                }
                "REFRESH_SAFETY_FLOOR_MS" => self.refresh.safety_floor_ms = parse(&key, value)?,
                "REFRESH_CONCURRENCY" => self.refresh.concurrency = parse(&key, value)?,
                "REFRESH_RATE_LIMIT" => self.refresh.rate_limit = parse(&key, value)?,
                "STORE_MAX_RETRIES" => self.store.max_retries = parse(&key, value)?,
                "STORE_READ_CACHE_CAPACITY" => {
                    self.store.read_cache_capacity = parse(&key, value)?
                }
                "STORE_READ_CACHE_TTL_MS" => self.store.read_cache_ttl_ms = parse(&key, value)?,
                _ => tracing::warn!(variable = %key, "ignoring unknown caplife setting"),
            }
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::configuration(format!("invalid value '{value}' for {key}: {e}")))
}
