use caplife_cache::{CacheManager, Expires, RotatingCache};
use caplife_config::CacheSettings;
use caplife_core::{Clock, Error, ManualClock};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Counted {
    serial: usize,
    expires: Option<DateTime<Utc>>,
}

impl Expires for Counted {
    fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }
}

fn settings(ttl_ms: u64, margin_ms: u64) -> CacheSettings {
    CacheSettings::new(
        Duration::from_millis(ttl_ms),
        Duration::from_millis(margin_ms),
        100,
    )
}

/// Producer whose value is the number of times it has been called
fn counting_producer(
    calls: &Arc<AtomicUsize>,
) -> impl Fn() -> futures::future::Ready<caplife_core::Result<Counted>> + Send + Sync + Clone + 'static {
    let calls = Arc::clone(calls);
    move || {
        let serial = calls.fetch_add(1, Ordering::SeqCst) + 1;
        futures::future::ready(Ok(Counted { serial, expires: None }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_computation() {
    let cache: RotatingCache<String, Counted> = RotatingCache::new("agents", settings(60_000, 0));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get("tenant-1".to_string(), move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            let serial = calls.fetch_add(1, Ordering::SeqCst) + 1;
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(Counted { serial, expires: None })
                        }
                    })
                    .await
            })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(values[0].serial, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_is_promoted_then_recomputed() {
    let cache: RotatingCache<&str, Counted> = RotatingCache::new("rotation", settings(500, 250));
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = counting_producer(&calls);
    let start = Instant::now();

    let first = cache.get("k", producer.clone()).await.unwrap();
    assert_eq!(first.serial, 1);

    // Rotation started at 250ms; the original record is still live
    tokio::time::sleep_until(start + Duration::from_millis(400)).await;
    let before_ttl = cache.get("k", producer.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &before_ttl));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Past the TTL the rotated value is served without a synchronous call
    tokio::time::sleep_until(start + Duration::from_millis(600)).await;
    let promoted = cache.get("k", producer.clone()).await.unwrap();
    assert_eq!(promoted.serial, 2);
    assert_eq!(cache.stats().rotations_promoted, 1);

    // Both the promoted record and its own replacement have outlived the TTL
    tokio::time::sleep_until(start + Duration::from_millis(1200)).await;
    let recomputed = cache.get("k", producer).await.unwrap();
    assert_eq!(recomputed.serial, calls.load(Ordering::SeqCst));
    assert_ne!(recomputed.serial, promoted.serial);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_failure_keeps_current_value() {
    let cache: RotatingCache<&str, Counted> = RotatingCache::new("flaky", settings(500, 250));
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = {
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call == 2 {
                    Err(Error::network("kms", "connection reset"))
                } else {
                    Ok(Counted { serial: call, expires: None })
                }
            }
        }
    };
    let start = Instant::now();

    assert_eq!(cache.get("k", producer.clone()).await.unwrap().serial, 1);

    tokio::time::sleep_until(start + Duration::from_millis(400)).await;
    assert_eq!(cache.get("k", producer.clone()).await.unwrap().serial, 1);
    assert_eq!(cache.stats().rotation_failures, 1);

    tokio::time::sleep_until(start + Duration::from_millis(600)).await;
    assert_eq!(cache.get("k", producer).await.unwrap().serial, 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_rotation_past_value_expiry() {
    let clock = ManualClock::starting_now();
    let cache: RotatingCache<&str, Counted> =
        RotatingCache::with_clock("short-lived", settings(500, 250), Arc::new(clock.clone()));

    let soon = clock.now() + chrono::Duration::milliseconds(200);
    cache
        .get("short", move || async move { Ok(Counted { serial: 1, expires: Some(soon) }) })
        .await
        .unwrap();

    let later = clock.now() + chrono::Duration::hours(1);
    cache
        .get("long", move || async move { Ok(Counted { serial: 1, expires: Some(later) }) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.stats().rotations_started, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidated_key_is_recomputed() {
    let cache: RotatingCache<&str, Counted> = RotatingCache::new("invalidate", settings(10_000, 0));
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = counting_producer(&calls);

    cache.get("k", producer.clone()).await.unwrap();
    cache.get("k", producer.clone()).await.unwrap();
    assert!(cache.invalidate(&"k"));
    let value = cache.get("k", producer).await.unwrap();

    assert_eq!(value.serial, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_manager_reset_clears_named_caches() {
    let manager = CacheManager::new(settings(60_000, 0));
    let agents = manager.rotating::<String, Counted>("agents").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    agents
        .get("a".to_string(), counting_producer(&calls))
        .await
        .unwrap();
    manager.reset();

    let again = manager.rotating::<String, Counted>("agents").unwrap();
    let value = again
        .get("a".to_string(), counting_producer(&calls))
        .await
        .unwrap();
    assert_eq!(value.serial, 2);
}
