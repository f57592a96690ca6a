//! Remote authority that owns a tenant's refresh policy

use async_trait::async_trait;
use caplife_core::{Capability, RefreshPolicy, Result};
use serde_json::Value;

/// Client for the endpoints addressed by a tenant's refresh capability
///
/// Both calls are invoked with the refresh capability itself. Errors must be
/// classified: `NotFound` and `NotAllowed` mean the tenant is misconfigured,
/// anything else is treated as transient.
#[async_trait]
pub trait RefreshAuthority: Send + Sync {
    /// `GET <refreshTarget>/policy`
    ///
    /// `service_type` names the service asking, so one authority can hold
    /// different policies for the services acting on a tenant.
    async fn fetch_policy(&self, service_type: &str, refresh: &Capability) -> Result<RefreshPolicy>;

    /// `POST <refreshTarget>` with `capability` as the body
    ///
    /// Returns the raw response; it is only trusted after validation.
    async fn refresh_capability(&self, refresh: &Capability, capability: &Capability) -> Result<Value>;
}
