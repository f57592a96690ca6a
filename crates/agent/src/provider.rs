//! Ephemeral agent provider
//!
//! Signing with a long-lived service identity goes through a slow external
//! key manager. Instead, the provider re-delegates a tenant's capabilities to
//! a locally generated agent once and caches the result, keyed on the exact
//! versions of the configuration and the identity. Editing either one bumps
//! its sequence and so yields a new key and a new agent.

use crate::agent::EphemeralAgent;
use caplife_cache::{CacheManager, Expires, RotatingCache};
use caplife_config::AgentSettings;
use caplife_core::{
    add_duration, Capability, CapabilityDelegator, Clock, DelegationRequest, Error, Result,
    ServiceIdentity, Signer, SignerSource, TenantConfiguration,
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Name of the agent cache in the [`CacheManager`]
pub const AGENT_CACHE: &str = "ephemeral-agents";

/// Versioned identity of an ephemeral agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentKey {
    pub config_id: String,
    pub config_sequence: u64,
    pub identity_id: String,
    pub identity_sequence: u64,
}

impl AgentKey {
    pub fn new(config: &TenantConfiguration, identity: &ServiceIdentity) -> Self {
        Self {
            config_id: config.id.clone(),
            config_sequence: config.sequence,
            identity_id: identity.id.clone(),
            identity_sequence: identity.sequence,
        }
    }
}

/// An agent together with the capabilities delegated to it
#[derive(Debug)]
pub struct AgentRecord {
    pub agent: Arc<EphemeralAgent>,
    pub capabilities: BTreeMap<String, Capability>,
    /// Earliest expiry among `capabilities`
    pub expires: DateTime<Utc>,
}

impl AgentRecord {
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn controller(&self) -> &str {
        self.agent.controller()
    }
}

impl Expires for AgentRecord {
    fn expires(&self) -> Option<DateTime<Utc>> {
        Some(self.expires)
    }
}

/// Hands out cached ephemeral agents for (configuration, identity) pairs
pub struct EphemeralAgentProvider {
    cache: RotatingCache<AgentKey, AgentRecord>,
    factory: AgentFactory,
}

impl EphemeralAgentProvider {
    pub fn new(
        caches: &CacheManager,
        settings: &AgentSettings,
        delegator: Arc<dyn CapabilityDelegator>,
        signers: Arc<dyn SignerSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        caches.configure(AGENT_CACHE, settings.cache.clone());
        let cache = caches.rotating(AGENT_CACHE)?;
        Ok(Self {
            cache,
            factory: AgentFactory {
                delegator,
                signers,
                clock,
                max_lifetime: settings.max_lifetime(),
            },
        })
    }

    /// Get the agent for this exact configuration and identity version
    ///
    /// Fails if any delegation fails or if the delegated capabilities are
    /// already expired; nothing is cached in either case.
    #[instrument(
        skip_all,
        fields(config = %config.id, sequence = config.sequence, identity = %identity.id)
    )]
    pub async fn get_agent(
        &self,
        config: &TenantConfiguration,
        identity: &ServiceIdentity,
    ) -> Result<Arc<AgentRecord>> {
        let key = AgentKey::new(config, identity);
        let factory = self.factory.clone();
        let config = Arc::new(config.clone());
        let identity = Arc::new(identity.clone());

        self.cache
            .get(key, move || {
                let factory = factory.clone();
                let config = Arc::clone(&config);
                let identity = Arc::clone(&identity);
                async move { factory.create(&config, &identity).await }
            })
            .await
    }

    /// Drop the cached agent for this configuration and identity version
    pub fn invalidate(&self, config: &TenantConfiguration, identity: &ServiceIdentity) -> bool {
        self.cache.invalidate(&AgentKey::new(config, identity))
    }

    pub fn cache(&self) -> &RotatingCache<AgentKey, AgentRecord> {
        &self.cache
    }
}

#[derive(Clone)]
struct AgentFactory {
    delegator: Arc<dyn CapabilityDelegator>,
    signers: Arc<dyn SignerSource>,
    clock: Arc<dyn Clock>,
    max_lifetime: Duration,
}

impl AgentFactory {
    async fn create(&self, config: &TenantConfiguration, identity: &ServiceIdentity) -> Result<AgentRecord> {
        let signer = self.signers.invocation_signer(identity).await?;
        let agent = Arc::new(EphemeralAgent::generate());
        let now = self.clock.now();
        let ceiling = add_duration(now, self.max_lifetime);

        let delegations = config.capabilities.iter().map(|(name, capability)| {
            let request = DelegationRequest {
                capability,
                controller: agent.controller(),
                signer: signer.as_ref(),
                max_expires: capability.expires.min(ceiling),
            };
            async move {
                let delegated = self.delegator.delegate(request).await?;
                check_delegated(&request, &delegated)?;
                Ok::<_, Error>((name.clone(), delegated))
            }
        });
        let capabilities: BTreeMap<String, Capability> =
            try_join_all(delegations).await?.into_iter().collect();

        let weakest = capabilities
            .iter()
            .min_by_key(|(_, capability)| capability.expires);
        let expires = match weakest {
            Some((name, capability)) => {
                if capability.expires <= now {
                    return Err(Error::capability_expired(
                        format!("{}#{name}", config.id),
                        capability.expires,
                    ));
                }
                capability.expires
            }
            None => ceiling,
        };

        debug!(
            controller = agent.controller(),
            capabilities = capabilities.len(),
            %expires,
            "created ephemeral agent"
        );

        Ok(AgentRecord {
            agent,
            capabilities,
            expires,
        })
    }
}

/// Reject delegations that do not name the agent or exceed the ceiling
fn check_delegated(request: &DelegationRequest<'_>, delegated: &Capability) -> Result<()> {
    if delegated.controller != request.controller {
        return Err(Error::delegation(
            &request.capability.id,
            format!(
                "delegated to '{}' instead of '{}'",
                delegated.controller, request.controller
            ),
        ));
    }
    if delegated.expires > request.max_expires {
        return Err(Error::delegation(
            &request.capability.id,
            format!(
                "delegated capability expires at {} past the ceiling {}",
                delegated.expires, request.max_expires
            ),
        ));
    }
    Ok(())
}
