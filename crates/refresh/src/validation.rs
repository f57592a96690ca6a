//! Structural checks on capabilities returned by the refresh authority
//!
//! A response is only installed when every check passes; otherwise the
//! capability it was meant to replace stays in place.

use caplife_core::{Capability, Error, Result, DELEGATION_PROOF_PURPOSE};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Parse and validate a refreshed capability against the one it replaces
pub fn validate_refreshed(
    original: &Capability,
    response: Value,
    now: DateTime<Utc>,
) -> Result<Capability> {
    let refreshed: Capability = serde_json::from_value(response).map_err(|e| {
        Error::invalid_capability(&original.id, format!("response is not a capability: {e}"))
    })?;

    let invalid = |reason: String| Error::invalid_capability(&original.id, reason);

    if refreshed.id.is_empty() {
        return Err(invalid("refreshed capability has an empty id".to_string()));
    }
    if refreshed.invocation_target != original.invocation_target {
        return Err(invalid(format!(
            "invocation target changed from '{}' to '{}'",
            original.invocation_target, refreshed.invocation_target
        )));
    }
    if refreshed.controller != original.controller {
        return Err(invalid(format!(
            "controller changed from '{}' to '{}'",
            original.controller, refreshed.controller
        )));
    }
    if refreshed.expires <= now {
        return Err(invalid(format!(
            "refreshed capability already expired at {}",
            refreshed.expires
        )));
    }

    let Some(proof) = &refreshed.proof else {
        return Err(invalid("missing proof".to_string()));
    };
    if proof.proof_type.is_empty() {
        return Err(invalid("proof has no type".to_string()));
    }
    if proof.verification_method.is_empty() {
        return Err(invalid("proof has no verification method".to_string()));
    }
    if proof.proof_purpose != DELEGATION_PROOF_PURPOSE {
        return Err(invalid(format!(
            "proof purpose '{}' is not '{DELEGATION_PROOF_PURPOSE}'",
            proof.proof_purpose
        )));
    }
    if proof.proof_value.is_empty() {
        return Err(invalid("proof has no value".to_string()));
    }
    if proof.capability_chain.is_empty() {
        return Err(invalid("proof has an empty capability chain".to_string()));
    }

    Ok(refreshed)
}
