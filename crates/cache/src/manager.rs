//! Named cache registry
//!
//! Components ask the manager for a cache by name instead of building their
//! own, so settings for every cache live in one place and tests can wipe all
//! cached state with a single [`CacheManager::reset`].

use crate::rotating::{Expires, RotatingCache};
use crate::stats::CacheStatistics;
use caplife_config::CacheSettings;
use caplife_core::{Clock, Error, Result, SystemClock};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info};

/// Type-erased view of a registered cache
trait ManagedCache: Send + Sync {
    fn clear(&self);
    fn len(&self) -> usize;
    fn stats(&self) -> CacheStatistics;
    fn as_any(&self) -> &dyn Any;
}

impl<K, V> ManagedCache for RotatingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Expires + Send + Sync + 'static,
{
    fn clear(&self) {
        RotatingCache::clear(self);
    }

    fn len(&self) -> usize {
        RotatingCache::len(self)
    }

    fn stats(&self) -> CacheStatistics {
        RotatingCache::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry of named rotating caches
pub struct CacheManager {
    clock: Arc<dyn Clock>,
    defaults: RwLock<CacheSettings>,
    overrides: DashMap<String, CacheSettings>,
    caches: DashMap<String, Arc<dyn ManagedCache>>,
}

impl CacheManager {
    pub fn new(defaults: CacheSettings) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    pub fn with_clock(defaults: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            defaults: RwLock::new(defaults),
            overrides: DashMap::new(),
            caches: DashMap::new(),
        }
    }

    /// Use `settings` for the cache called `name` when it is next created
    pub fn configure(&self, name: impl Into<String>, settings: CacheSettings) {
        self.overrides.insert(name.into(), settings);
    }

    /// Settings the cache called `name` is (or would be) created with
    pub fn settings_for(&self, name: &str) -> CacheSettings {
        self.overrides
            .get(name)
            .map(|s| s.clone())
            .unwrap_or_else(|| self.defaults.read().clone())
    }

    /// Get the cache called `name`, creating it on first use
    ///
    /// Asking for an existing name with different key or value types is a
    /// configuration error.
    pub fn rotating<K, V>(&self, name: &str) -> Result<RotatingCache<K, V>>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Expires + Send + Sync + 'static,
    {
        let entry = self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| {
                let settings = self.settings_for(name);
                debug!(cache = name, ?settings, "creating cache");
                let cache: Arc<dyn ManagedCache> = Arc::new(RotatingCache::<K, V>::with_clock(
                    name,
                    settings,
                    Arc::clone(&self.clock),
                ));
                cache
            })
            .value()
            .clone();

        entry
            .as_any()
            .downcast_ref::<RotatingCache<K, V>>()
            .cloned()
            .ok_or_else(|| {
                Error::configuration(format!(
                    "cache '{name}' already exists with different key or value types"
                ))
            })
    }

    /// Empty every registered cache, keeping the registrations
    pub fn reset(&self) {
        for cache in self.caches.iter() {
            cache.value().clear();
        }
        info!(caches = self.caches.len(), "cleared all caches");
    }

    /// Replace the default settings and drop every registered cache
    ///
    /// Handles obtained before the call keep working against the old caches;
    /// new lookups create fresh caches with the new settings.
    pub fn reconfigure(&self, defaults: CacheSettings) {
        *self.defaults.write() = defaults;
        for cache in self.caches.iter() {
            cache.value().clear();
        }
        self.caches.clear();
        info!("cache defaults replaced");
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len_of(&self, name: &str) -> Option<usize> {
        self.caches.get(name).map(|c| c.len())
    }

    /// Statistics for every registered cache, by name
    pub fn stats(&self) -> BTreeMap<String, CacheStatistics> {
        self.caches
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("defaults", &*self.defaults.read())
            .field("caches", &self.names())
            .finish()
    }
}
