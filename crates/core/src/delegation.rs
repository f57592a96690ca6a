//! Contracts for the signing and delegation collaborators
//!
//! caplife never implements capability signatures itself. It decides when
//! delegation happens and what expiry ceiling applies, and hands the actual
//! work to these traits.

use crate::errors::Result;
use crate::types::{Capability, ServiceIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;

/// Something able to sign capability delegations and invocations
pub trait Signer: Debug + Send + Sync {
    /// Verification method id, e.g. `did:key:z..#z..`
    fn id(&self) -> &str;

    /// The controller the verification method belongs to
    fn controller(&self) -> &str;

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Key-management collaborator that yields a signer for a service identity
#[async_trait]
pub trait SignerSource: Send + Sync {
    async fn invocation_signer(&self, identity: &ServiceIdentity) -> Result<Arc<dyn Signer>>;
}

/// Parameters for one delegation
#[derive(Debug, Clone, Copy)]
pub struct DelegationRequest<'a> {
    /// The capability to delegate from
    pub capability: &'a Capability,
    /// Controller of the new capability
    pub controller: &'a str,
    /// Signer holding authority over `capability`
    pub signer: &'a dyn Signer,
    /// Ceiling for the new capability's `expires`
    pub max_expires: DateTime<Utc>,
}

/// Issues a new capability derived from a parent
///
/// Implementations are expected to be safe to retry; callers do not retry
/// on their own.
#[async_trait]
pub trait CapabilityDelegator: Send + Sync {
    async fn delegate(&self, request: DelegationRequest<'_>) -> Result<Capability>;
}
