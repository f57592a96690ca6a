use async_trait::async_trait;
use caplife_agent::{AgentRecord, EphemeralAgent, EphemeralAgentProvider};
use caplife_cache::CacheManager;
use caplife_config::{AgentSettings, StoreSettings};
use caplife_core::{
    AllowedAction, Capability, CapabilityDelegator, DelegationRequest, Error, ErrorKind, Result,
    ServiceIdentity, Signer, SignerSource, SystemClock, TenantConfiguration,
};
use caplife_store::{BackingStore, MemoryBackingStore, StoreConnector, StoreProvider};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct PassThroughDelegator;

#[async_trait]
impl CapabilityDelegator for PassThroughDelegator {
    async fn delegate(&self, request: DelegationRequest<'_>) -> Result<Capability> {
        let mut delegated = request.capability.clone();
        delegated.id = format!("{}/delegated", request.capability.id);
        delegated.parent_capability = request.capability.id.clone();
        delegated.controller = request.controller.to_string();
        delegated.expires = request.max_expires;
        Ok(delegated)
    }
}

#[derive(Debug)]
struct LocalSigners(Arc<EphemeralAgent>);

#[async_trait]
impl SignerSource for LocalSigners {
    async fn invocation_signer(&self, _identity: &ServiceIdentity) -> Result<Arc<dyn Signer>> {
        Ok(self.0.clone() as Arc<dyn Signer>)
    }
}

/// Connects to an in-memory store, requiring an `edv` capability
#[derive(Default)]
struct MemoryConnector {
    connects: AtomicUsize,
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        config: &TenantConfiguration,
        agent: &AgentRecord,
    ) -> Result<Arc<dyn BackingStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if agent.capability("edv").is_none() {
            return Err(Error::not_allowed(&config.id, "no edv capability"));
        }
        Ok(Arc::new(MemoryBackingStore::new()))
    }
}

fn config(id: &str, with_edv: bool) -> TenantConfiguration {
    let config = TenantConfiguration::new(id);
    if !with_edv {
        return config;
    }
    config.with_capability(
        "edv",
        Capability {
            context: None,
            id: format!("urn:zcap:{id}:edv"),
            invocation_target: format!("https://edv.example/{id}"),
            controller: "did:key:service".to_string(),
            expires: Utc::now() + ChronoDuration::days(10),
            allowed_action: AllowedAction::Many(vec!["read".into(), "write".into()]),
            parent_capability: "urn:zcap:root:edv".to_string(),
            proof: None,
        },
    )
}

fn provider(caches: &CacheManager, connector: Arc<MemoryConnector>) -> StoreProvider {
    let agents = EphemeralAgentProvider::new(
        caches,
        &AgentSettings::default(),
        Arc::new(PassThroughDelegator),
        Arc::new(LocalSigners(Arc::new(EphemeralAgent::generate()))),
        Arc::new(SystemClock),
    )
    .unwrap();
    StoreProvider::new(caches, &StoreSettings::default(), Arc::new(agents), connector).unwrap()
}

#[tokio::test]
async fn test_store_handle_is_cached_per_version() {
    let caches = CacheManager::default();
    let connector = Arc::new(MemoryConnector::default());
    let provider = provider(&caches, connector.clone());
    let identity = ServiceIdentity::new("payments", "did:key:service", "kms:1");
    let tenant = config("tenant-a", true);

    let first = provider.get_store(&tenant, &identity).await.unwrap();
    first
        .store
        .insert(json!({"id": "doc-1"}), json!({"type": "Note"}))
        .await
        .unwrap();
    let second = provider.get_store(&tenant, &identity).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.store.get("doc-1", false).await.unwrap().sequence, 0);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(first.agent.expires, first.agent.capability("edv").unwrap().expires);

    // A new configuration version gets its own handle
    let mut next = tenant.clone();
    next.sequence += 1;
    let third = provider.get_store(&next, &identity).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_connect_failure_is_not_cached() {
    let caches = CacheManager::default();
    let connector = Arc::new(MemoryConnector::default());
    let provider = provider(&caches, connector.clone());
    let identity = ServiceIdentity::new("payments", "did:key:service", "kms:1");
    let tenant = config("tenant-b", false);

    let err = provider.get_store(&tenant, &identity).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAllowed);
    provider.get_store(&tenant, &identity).await.unwrap_err();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}
