//! The long-lived identity a service acts as

use serde::{Deserialize, Serialize};

/// Persisted service identity record
///
/// Like tenant configurations, `(id, sequence)` names one version; any edit
/// bumps `sequence` and so invalidates every ephemeral agent derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    pub id: String,
    pub sequence: u64,
    pub service_type: String,
    pub controller: String,
    /// Reference to the key held by the key-management collaborator
    pub key_reference: String,
}

impl ServiceIdentity {
    pub fn new(
        service_type: impl Into<String>,
        controller: impl Into<String>,
        key_reference: impl Into<String>,
    ) -> Self {
        let service_type = service_type.into();
        Self {
            id: format!("urn:caplife:service:{service_type}"),
            sequence: 0,
            service_type,
            controller: controller.into(),
            key_reference: key_reference.into(),
        }
    }
}
