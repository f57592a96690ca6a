//! Self-rotating expiring cache
//!
//! `get(key, producer)` memoizes the *future* returned by `producer`, so all
//! concurrent callers for a key share one in-flight computation. Once a record
//! reaches `ttl - rotation_margin`, a background timer calls the producer
//! again and parks the result next to the live record. When the live record
//! outlives its TTL, the next access promotes the replacement instead of
//! recomputing synchronously.
//!
//! Every slot mutation (install, rotate, promote, evict) happens under the
//! DashMap entry guard for that key and is conditioned on record ids, so
//! unrelated keys never contend and a stale timer can never overwrite a newer
//! record.

mod record;

pub use record::{Expires, RecordId};

use crate::stats::{CacheStatistics, StatsCounters};
use caplife_config::CacheSettings;
use caplife_core::{add_duration, Clock, Error, Result, SystemClock};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use record::{Origin, Producer, Record, Slot};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A bounded TTL cache that refreshes its records ahead of expiry
pub struct RotatingCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for RotatingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K, V> {
    name: String,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    slots: DashMap<K, Slot<V>>,
    next_id: AtomicU64,
    stats: StatsCounters,
}

impl<K, V> RotatingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Expires + Send + Sync + 'static,
{
    /// Create a cache reading wall-clock time from the system
    pub fn new(name: impl Into<String>, settings: CacheSettings) -> Self {
        Self::with_clock(name, settings, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit wall clock for value expiry checks
    pub fn with_clock(name: impl Into<String>, settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                settings,
                clock,
                slots: DashMap::new(),
                next_id: AtomicU64::new(1),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Return the cached value for `key`, computing it with `producer` on a miss
    ///
    /// `producer` is retained for background rotation of this key, so it must
    /// be callable repeatedly.
    pub async fn get<F, Fut>(&self, key: K, producer: F) -> Result<Arc<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let producer: Producer<V> = Arc::new(move || producer().boxed());
        self.inner.get(key, producer).await
    }

    /// Drop the record for `key`, cancelling any scheduled rotation
    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.slots.remove(key).is_some()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.inner.slots.clear();
        self.inner.stats.reset();
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.slots.contains_key(key)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn stats(&self) -> CacheStatistics {
        self.inner.stats.snapshot()
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Expires + Send + Sync + 'static,
{
    async fn get(self: &Arc<Self>, key: K, producer: Producer<V>) -> Result<Arc<V>> {
        let mut recomputed_after_expiry = false;
        let mut recomputed_after_rotation_failure = false;

        loop {
            let record = self.lookup_or_install(&key, &producer);

            match record.value.clone().await {
                Ok(value) => {
                    let now = self.clock.now();
                    match value.expires() {
                        Some(expires) if expires <= now => {
                            if self.replace_expired(&key, record.id) {
                                debug!(
                                    cache = %self.name,
                                    key = ?key,
                                    record = record.id,
                                    %expires,
                                    "cached value is past its expiry, serving its replacement"
                                );
                                continue;
                            }
                            self.evict_record(&key, record.id);
                            self.stats.record_expired_eviction();
                            if recomputed_after_expiry {
                                return Err(Error::capability_expired(
                                    format!("{}:{key:?}", self.name),
                                    expires,
                                ));
                            }
                            debug!(
                                cache = %self.name,
                                key = ?key,
                                record = record.id,
                                %expires,
                                "cached value is past its expiry, recomputing"
                            );
                            recomputed_after_expiry = true;
                        }
                        _ => return Ok(value),
                    }
                }
                Err(error) => {
                    self.evict_record(&key, record.id);
                    if record.origin == Origin::Rotation && !recomputed_after_rotation_failure {
                        debug!(
                            cache = %self.name,
                            key = ?key,
                            error = %error,
                            "promoted rotation failed, recomputing on demand"
                        );
                        recomputed_after_rotation_failure = true;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Find the live record for `key`, promoting or creating one as needed
    fn lookup_or_install(self: &Arc<Self>, key: &K, producer: &Producer<V>) -> Arc<Record<V>> {
        if !self.slots.contains_key(key) {
            self.make_room();
        }

        let now = Instant::now();
        let ttl = self.settings.ttl();

        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.last_access = now;

                if !slot.current.is_stale(now, ttl) {
                    self.stats.record_hit();
                    return Arc::clone(&slot.current);
                }

                if let Some(pending) = slot.pending.take() {
                    if !pending.is_stale(now, ttl) {
                        debug!(
                            cache = %self.name,
                            key = ?key,
                            record = pending.id,
                            replaces = slot.current.id,
                            "promoting rotated record"
                        );
                        slot.current = Arc::clone(&pending);
                        self.stats.record_rotation_promoted();
                        self.stats.record_hit();
                        self.schedule_rotation(key.clone(), &pending);
                        return pending;
                    }
                }

                trace!(cache = %self.name, key = ?key, "record outlived its ttl");
                self.stats.record_miss();
                let record = self.new_record(producer, Origin::Demand, now);
                slot.current = Arc::clone(&record);
                slot.producer = Arc::clone(producer);
                self.schedule_rotation(key.clone(), &record);
                record
            }
            Entry::Vacant(vacant) => {
                self.stats.record_miss();
                let record = self.new_record(producer, Origin::Demand, now);
                vacant.insert(Slot {
                    current: Arc::clone(&record),
                    pending: None,
                    producer: Arc::clone(producer),
                    last_access: now,
                });
                self.schedule_rotation(key.clone(), &record);
                record
            }
        }
    }

    fn new_record(&self, producer: &Producer<V>, origin: Origin, now: Instant) -> Arc<Record<V>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let computation = producer();
        let value = async move { computation.await.map(Arc::new) }.boxed().shared();
        Arc::new(Record::new(id, origin, now, value))
    }

    /// Arm the timer that rotates `record` once it reaches `ttl - margin`
    fn schedule_rotation(self: &Arc<Self>, key: K, record: &Arc<Record<V>>) {
        let Some(delay) = self.settings.rotation_delay() else {
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let value = record.value.clone();
        let record_id = record.id;
        let rotate_at = record.created_at + delay;

        let timer = tokio::spawn(async move {
            let Ok(current) = value.await else {
                return;
            };

            if let Some(expires) = current.expires() {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let until_rotation = rotate_at.saturating_duration_since(Instant::now());
                if add_duration(inner.clock.now(), until_rotation) >= expires {
                    debug!(
                        cache = %inner.name,
                        key = ?key,
                        record = record_id,
                        %expires,
                        "value expires before its rotation window, not rotating"
                    );
                    return;
                }
            }

            tokio::time::sleep_until(rotate_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.rotate(key, record_id).await;
            }
        });
        record.set_timer(timer.abort_handle());
    }

    /// Compute a replacement for `record_id` if it is still the live record
    async fn rotate(self: &Arc<Self>, key: K, record_id: RecordId) {
        let pending = {
            let Some(mut slot) = self.slots.get_mut(&key) else {
                trace!(cache = %self.name, key = ?key, "key evicted, skipping rotation");
                return;
            };
            if slot.current.id != record_id {
                trace!(cache = %self.name, key = ?key, "record already replaced, skipping rotation");
                return;
            }
            if slot.pending.is_some() {
                trace!(cache = %self.name, key = ?key, "rotation already in flight");
                return;
            }
            let pending = self.new_record(&slot.producer, Origin::Rotation, Instant::now());
            slot.pending = Some(Arc::clone(&pending));
            pending
        };

        self.stats.record_rotation_started();
        debug!(
            cache = %self.name,
            key = ?key,
            record = record_id,
            replacement = pending.id,
            "rotating record"
        );

        if let Err(error) = pending.value.clone().await {
            self.stats.record_rotation_failure();
            warn!(
                cache = %self.name,
                key = ?key,
                record = record_id,
                error = %error,
                "rotation failed, keeping current record"
            );
            if let Some(mut slot) = self.slots.get_mut(&key) {
                if slot.pending.as_ref().map(|p| p.id) == Some(pending.id) {
                    slot.pending = None;
                }
            }
        }
    }

    /// Swap an expired live record for its rotated replacement
    ///
    /// Returns `false` when the slot has no replacement to offer, in which
    /// case the caller evicts and recomputes. A slot that already moved past
    /// `expired_id` counts as replaced.
    fn replace_expired(self: &Arc<Self>, key: &K, expired_id: RecordId) -> bool {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return false;
        };
        if slot.current.id != expired_id {
            return true;
        }
        let Some(pending) = slot.pending.take() else {
            return false;
        };
        slot.current = Arc::clone(&pending);
        slot.last_access = Instant::now();
        self.stats.record_rotation_promoted();
        self.schedule_rotation(key.clone(), &pending);
        true
    }

    /// Remove the slot for `key` only if it still serves `record_id`
    fn evict_record(&self, key: &K, record_id: RecordId) {
        self.slots
            .remove_if(key, |_, slot| slot.current.id == record_id);
    }

    /// Evict the least recently accessed slot when at capacity
    fn make_room(&self) {
        while self.slots.len() >= self.settings.max_entries {
            let oldest = self
                .slots
                .iter()
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| entry.key().clone());

            let Some(oldest) = oldest else {
                return;
            };
            if self.slots.remove(&oldest).is_some() {
                self.stats.record_capacity_eviction();
                debug!(cache = %self.name, key = ?oldest, "evicted least recently used key");
            }
        }
    }
}

impl<K: Eq + Hash, V> Debug for RotatingCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingCache")
            .field("name", &self.inner.name)
            .field("settings", &self.inner.settings)
            .field("len", &self.inner.slots.len())
            .finish()
    }
}
