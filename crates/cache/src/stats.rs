//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a cache's counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Served from a live record (including coalesced in-flight ones)
    pub hits: u64,
    /// A caller had to start a computation
    pub misses: u64,
    /// Background rotations started
    pub rotations_started: u64,
    /// Rotated records promoted into their slot
    pub rotations_promoted: u64,
    /// Background rotations whose producer failed
    pub rotation_failures: u64,
    /// Records evicted because the value's own expiry passed
    pub expired_evictions: u64,
    /// Slots evicted to stay within capacity
    pub capacity_evictions: u64,
}

impl CacheStatistics {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Lock-free counters shared by a cache and its timers
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    rotations_started: AtomicU64,
    rotations_promoted: AtomicU64,
    rotation_failures: AtomicU64,
    expired_evictions: AtomicU64,
    capacity_evictions: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation_started(&self) {
        self.rotations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation_promoted(&self) {
        self.rotations_promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation_failure(&self) {
        self.rotation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired_eviction(&self) {
        self.expired_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capacity_eviction(&self) {
        self.capacity_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rotations_started: self.rotations_started.load(Ordering::Relaxed),
            rotations_promoted: self.rotations_promoted.load(Ordering::Relaxed),
            rotation_failures: self.rotation_failures.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
            capacity_evictions: self.capacity_evictions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.rotations_started,
            &self.rotations_promoted,
            &self.rotation_failures,
            &self.expired_evictions,
            &self.capacity_evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
