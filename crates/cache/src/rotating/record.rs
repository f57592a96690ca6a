//! Records and slots of the rotating cache
//!
//! A slot owns the record currently served for its key and, while a rotation
//! is under way or finished but not yet promoted, the replacement record.
//! Records never reference their replacement; the slot links them, so there
//! are no ownership cycles between a record and the future computing its
//! successor.

use caplife_core::Result;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Identity of one computed record; never reused within a cache
pub type RecordId = u64;

/// Values stored in a rotating cache may carry their own wall-clock expiry
///
/// Cache TTL and value expiry are checked independently: a value whose
/// `expires` has passed is never handed out, even if its slot is still
/// within the TTL.
pub trait Expires {
    fn expires(&self) -> Option<DateTime<Utc>> {
        None
    }
}

pub(crate) type Producer<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V>> + Send + Sync>;

pub(crate) type SharedValue<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Computed synchronously for a caller
    Demand,
    /// Computed in the background ahead of the TTL
    Rotation,
}

pub(crate) struct Record<V> {
    pub(crate) id: RecordId,
    pub(crate) origin: Origin,
    pub(crate) created_at: Instant,
    pub(crate) value: SharedValue<V>,
    timer: Mutex<Option<AbortHandle>>,
}

impl<V> Record<V> {
    pub(crate) fn new(id: RecordId, origin: Origin, created_at: Instant, value: SharedValue<V>) -> Self {
        Self {
            id,
            origin,
            created_at,
            value,
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }

    pub(crate) fn set_timer(&self, handle: AbortHandle) {
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl<V> Drop for Record<V> {
    fn drop(&mut self) {
        // A dropped record no longer needs its rotation
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

pub(crate) struct Slot<V> {
    pub(crate) current: Arc<Record<V>>,
    pub(crate) pending: Option<Arc<Record<V>>>,
    pub(crate) producer: Producer<V>,
    pub(crate) last_access: Instant,
}
