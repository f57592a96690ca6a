//! Delegated authorization capabilities
//!
//! A capability is an opaque signed object to everything in caplife except
//! its `id`, `invocationTarget`, `controller` and `expires` fields. Capabilities
//! are never mutated: refreshing one means delegating a new capability and
//! replacing the reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Proof purpose carried by every delegated capability
pub const DELEGATION_PROOF_PURPOSE: &str = "capabilityDelegation";

/// A signed, expiring capability delegated from a parent to a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    pub invocation_target: String,
    pub controller: String,
    pub expires: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "AllowedAction::is_empty")]
    pub allowed_action: AllowedAction,
    pub parent_capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<DelegationProof>,
}

impl Capability {
    /// Whether the capability is unusable at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Actions a capability allows; a single string or a list on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedAction {
    One(String),
    Many(Vec<String>),
}

impl Default for AllowedAction {
    fn default() -> Self {
        AllowedAction::Many(Vec::new())
    }
}

impl AllowedAction {
    pub fn is_empty(&self) -> bool {
        match self {
            AllowedAction::One(action) => action.is_empty(),
            AllowedAction::Many(actions) => actions.is_empty(),
        }
    }

    pub fn allows(&self, action: &str) -> bool {
        match self {
            AllowedAction::One(allowed) => allowed == action,
            AllowedAction::Many(allowed) => allowed.iter().any(|a| a == action),
        }
    }
}

/// Linked-data proof attached by the delegator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationProof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: DateTime<Utc>,
    pub verification_method: String,
    pub proof_purpose: String,
    pub capability_chain: Vec<Value>,
    pub proof_value: String,
}
