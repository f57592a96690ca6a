//! Per-tenant document store handles
//!
//! Opening a tenant's encrypted store requires the tenant's capabilities, so
//! a store handle is built from the ephemeral agent holding them and lives
//! no longer than that agent.

use crate::backing::BackingStore;
use crate::document_store::DocumentStore;
use async_trait::async_trait;
use caplife_agent::{AgentKey, AgentRecord, EphemeralAgentProvider};
use caplife_cache::{CacheManager, Expires, RotatingCache};
use caplife_config::StoreSettings;
use caplife_core::{Result, ServiceIdentity, TenantConfiguration};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Name of the store handle cache in the [`CacheManager`]
pub const STORE_CACHE: &str = "document-stores";

/// Opens the backing store of a tenant using an agent's capabilities
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        config: &TenantConfiguration,
        agent: &AgentRecord,
    ) -> Result<Arc<dyn BackingStore>>;
}

/// A document store bound to the agent it was opened with
#[derive(Debug)]
pub struct StoreHandle {
    pub store: DocumentStore,
    pub agent: Arc<AgentRecord>,
}

impl Expires for StoreHandle {
    fn expires(&self) -> Option<DateTime<Utc>> {
        Some(self.agent.expires)
    }
}

/// Caches one [`StoreHandle`] per configuration and identity version
pub struct StoreProvider {
    cache: RotatingCache<AgentKey, StoreHandle>,
    agents: Arc<EphemeralAgentProvider>,
    connector: Arc<dyn StoreConnector>,
    settings: StoreSettings,
}

impl StoreProvider {
    pub fn new(
        caches: &CacheManager,
        settings: &StoreSettings,
        agents: Arc<EphemeralAgentProvider>,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self> {
        caches.configure(STORE_CACHE, settings.client_cache.clone());
        Ok(Self {
            cache: caches.rotating(STORE_CACHE)?,
            agents,
            connector,
            settings: settings.clone(),
        })
    }

    /// Get the document store of `config`, acting as `identity`
    pub async fn get_store(
        &self,
        config: &TenantConfiguration,
        identity: &ServiceIdentity,
    ) -> Result<Arc<StoreHandle>> {
        let key = AgentKey::new(config, identity);
        let agents = Arc::clone(&self.agents);
        let connector = Arc::clone(&self.connector);
        let settings = self.settings.clone();
        let config = Arc::new(config.clone());
        let identity = Arc::new(identity.clone());

        self.cache
            .get(key, move || {
                let agents = Arc::clone(&agents);
                let connector = Arc::clone(&connector);
                let settings = settings.clone();
                let config = Arc::clone(&config);
                let identity = Arc::clone(&identity);
                async move {
                    let agent = agents.get_agent(&config, &identity).await?;
                    let backing = connector.connect(&config, &agent).await?;
                    debug!(config = %config.id, controller = agent.controller(), "opened document store");
                    Ok(StoreHandle {
                        store: DocumentStore::new(backing, &settings),
                        agent,
                    })
                }
            })
            .await
    }

    pub fn invalidate(&self, config: &TenantConfiguration, identity: &ServiceIdentity) -> bool {
        self.cache.invalidate(&AgentKey::new(config, identity))
    }
}
