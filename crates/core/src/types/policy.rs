//! Refresh policy returned by the remote refresh authority

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `{refresh: false | {constraints: {maxTtlBeforeRefresh?}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPolicy {
    pub refresh: RefreshSetting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefreshSetting {
    Flag(bool),
    Enabled {
        #[serde(default)]
        constraints: RefreshConstraints,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConstraints {
    /// Milliseconds before expiry at which a capability becomes due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl_before_refresh: Option<u64>,
}

impl RefreshPolicy {
    /// A policy that disables refresh for this cycle
    pub fn disabled() -> Self {
        Self {
            refresh: RefreshSetting::Flag(false),
        }
    }

    /// A policy enabling refresh with the given margin, or the default one
    pub fn enabled(max_ttl_before_refresh: Option<Duration>) -> Self {
        Self {
            refresh: RefreshSetting::Enabled {
                constraints: RefreshConstraints {
                    max_ttl_before_refresh: max_ttl_before_refresh
                        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                },
            },
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.refresh, RefreshSetting::Flag(false))
    }

    pub fn max_ttl_before_refresh(&self) -> Option<Duration> {
        match &self.refresh {
            RefreshSetting::Enabled { constraints } => constraints
                .max_ttl_before_refresh
                .map(Duration::from_millis),
            RefreshSetting::Flag(_) => None,
        }
    }
}
