//! Tenant configurations and their named capability sets

use super::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the capability a tenant grants for refreshing its other capabilities
pub const REFRESH_CAPABILITY: &str = "refresh";

/// A tenant's configuration, immutable once read
///
/// `sequence` increments on every accepted mutation, so `(id, sequence)`
/// identifies one exact version of the capability set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfiguration {
    pub id: String,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(rename = "zcaps", default)]
    pub capabilities: BTreeMap<String, Capability>,
}

impl TenantConfiguration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence: 0,
            controller: None,
            capabilities: BTreeMap::new(),
        }
    }

    /// Add a named capability, consuming and returning the configuration
    #[must_use]
    pub fn with_capability(mut self, name: impl Into<String>, capability: Capability) -> Self {
        self.capabilities.insert(name.into(), capability);
        self
    }

    /// The capability used to fetch refresh policy and re-delegate
    pub fn refresh_capability(&self) -> Option<&Capability> {
        self.capabilities.get(REFRESH_CAPABILITY)
    }

    /// A new version with the given capabilities replaced and `sequence + 1`
    #[must_use]
    pub fn next_version(&self, replacements: BTreeMap<String, Capability>) -> Self {
        let mut next = self.clone();
        next.sequence += 1;
        next.capabilities.extend(replacements);
        next
    }
}
