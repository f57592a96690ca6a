use async_trait::async_trait;
use caplife_config::RefreshSettings;
use caplife_core::{
    AllowedAction, Capability, Clock, Error, ErrorKind, ManualClock, RefreshPolicy, Result,
    TenantConfiguration, REFRESH_CAPABILITY,
};
use caplife_refresh::{refresh_due_time, CapabilityRefreshEngine, RefreshAuthority};
use caplife_utils::{cancel_pair, CancelSignal};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const SERVICE: &str = "example-service";

#[derive(Debug)]
struct FakeAuthority {
    clock: ManualClock,
    policy: Mutex<Result<RefreshPolicy>>,
    failing: HashSet<String>,
    malformed: HashSet<String>,
    latency: Duration,
    policy_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    policy_requesters: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeAuthority {
    fn new(clock: &ManualClock, policy: Result<RefreshPolicy>) -> Self {
        Self {
            clock: clock.clone(),
            policy: Mutex::new(policy),
            failing: HashSet::new(),
            malformed: HashSet::new(),
            latency: Duration::ZERO,
            policy_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            policy_requesters: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, ids: &[&str]) -> Self {
        self.failing.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    fn malformed(mut self, ids: &[&str]) -> Self {
        self.malformed.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl RefreshAuthority for FakeAuthority {
    async fn fetch_policy(&self, service_type: &str, _refresh: &Capability) -> Result<RefreshPolicy> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        self.policy_requesters
            .lock()
            .unwrap()
            .push(service_type.to_string());
        self.policy.lock().unwrap().clone()
    }

    async fn refresh_capability(&self, refresh: &Capability, capability: &Capability) -> Result<Value> {
        assert_eq!(refresh.id, "urn:zcap:refresh");
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&capability.id) {
            return Err(Error::network("https://tenant.example/refresh", "502 bad gateway"));
        }

        let mut response = json!({
            "id": format!("{}:refreshed", capability.id),
            "invocationTarget": capability.invocation_target,
            "controller": capability.controller,
            "expires": (self.clock.now() + ChronoDuration::days(90)).to_rfc3339(),
            "allowedAction": "read",
            "parentCapability": capability.parent_capability,
            "proof": {
                "type": "Ed25519Signature2020",
                "created": self.clock.now().to_rfc3339(),
                "verificationMethod": "did:key:tenant#key",
                "proofPurpose": "capabilityDelegation",
                "capabilityChain": [capability.parent_capability],
                "proofValue": "z58DAdFfa9SkqZMVPxAQpic7ndSayn1PzZs6ZjWp1CktyGesjuTSwRdo"
            }
        });
        if self.malformed.contains(&capability.id) {
            response["proof"]
                .as_object_mut()
                .unwrap()
                .remove("proofValue");
        }
        Ok(response)
    }
}

fn capability(id: &str, expires: DateTime<Utc>) -> Capability {
    Capability {
        context: None,
        id: id.to_string(),
        invocation_target: format!("https://edv.example/edvs/{id}"),
        controller: "did:key:service".to_string(),
        expires,
        allowed_action: AllowedAction::One("read".to_string()),
        parent_capability: format!("urn:zcap:root:{id}"),
        proof: None,
    }
}

/// A configuration whose refresh capability is never due
fn config(clock: &ManualClock) -> TenantConfiguration {
    TenantConfiguration::new("config-1").with_capability(
        REFRESH_CAPABILITY,
        capability("urn:zcap:refresh", clock.now() + ChronoDuration::days(365)),
    )
}

fn engine(authority: &Arc<FakeAuthority>, clock: &ManualClock, settings: RefreshSettings) -> CapabilityRefreshEngine {
    CapabilityRefreshEngine::new(authority.clone(), settings, Arc::new(clock.clone()))
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

#[tokio::test]
async fn test_without_refresh_capability_refresh_is_disabled() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None))));
    let engine = engine(&authority, &clock, RefreshSettings::default());
    let config = TenantConfiguration::new("config-1")
        .with_capability("edv", capability("edv", clock.now() + ChronoDuration::days(1)));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert!(!outcome.refresh.enabled);
    assert_eq!(outcome.refresh.after, None);
    assert!(outcome.config.is_none());
    assert!(outcome.error.is_none());
    assert_eq!(authority.policy_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_policy_disabling_refresh_skips_all_work() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(FakeAuthority::new(&clock, Ok(RefreshPolicy::disabled())));
    let engine = engine(&authority, &clock, RefreshSettings::default());
    let config = config(&clock)
        .with_capability("edv", capability("edv", clock.now() - ChronoDuration::days(1)));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert!(!outcome.refresh.enabled);
    assert_eq!(outcome.refresh.after, None);
    assert!(outcome.results.is_empty());
    assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_capability_inside_policy_margin_is_refreshed() {
    let clock = ManualClock::starting_now();
    let policy = RefreshPolicy::enabled(Some(days(30)));
    let authority = Arc::new(FakeAuthority::new(&clock, Ok(policy)));
    let engine = engine(&authority, &clock, RefreshSettings::default());
    let config = config(&clock)
        .with_capability("edv", capability("edv", clock.now() + ChronoDuration::days(10)));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].refreshed);
    let updated = outcome.config.unwrap();
    assert_eq!(updated.sequence, config.sequence + 1);
    assert_eq!(updated.capabilities["edv"].id, "edv:refreshed");
    assert_eq!(updated.capabilities[REFRESH_CAPABILITY].id, "urn:zcap:refresh");
    assert!(outcome.refresh.enabled);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_nothing_due_returns_earliest_due_time() {
    let clock = ManualClock::starting_now();
    let settings = RefreshSettings::default();
    let authority = Arc::new(FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None))));
    let engine = engine(&authority, &clock, settings.clone());
    let soonest = clock.now() + ChronoDuration::days(60);
    let config = config(&clock)
        .with_capability("edv", capability("edv", soonest))
        .with_capability("kms", capability("kms", clock.now() + ChronoDuration::days(90)));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert!(outcome.config.is_none());
    assert!(outcome.results.is_empty());
    assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 0);
    let expected = refresh_due_time(
        soonest,
        settings.clock_skew(),
        settings.default_max_ttl_before_refresh(),
    );
    assert_eq!(outcome.refresh.after, Some(expected));
}

#[tokio::test]
async fn test_next_attempt_clamped_to_safety_floor() {
    let clock = ManualClock::starting_now();
    let settings = RefreshSettings::default();
    let authority = Arc::new(FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None))));
    let engine = engine(&authority, &clock, settings.clone());
    // Due two minutes from now
    let expires = clock.now() + ChronoDuration::days(15) - ChronoDuration::minutes(5)
        + ChronoDuration::minutes(2);
    let config = config(&clock).with_capability("edv", capability("edv", expires));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.refresh.after, Some(clock.now() + ChronoDuration::minutes(5)));
}

#[tokio::test]
async fn test_failures_are_isolated_per_capability() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(
        FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None))).failing(&["b", "d"]),
    );
    let engine = engine(&authority, &clock, RefreshSettings::default());
    let expiring = clock.now() + ChronoDuration::days(1);
    let config = config(&clock)
        .with_capability("a", capability("a", expiring))
        .with_capability("b", capability("b", expiring))
        .with_capability("c", capability("c", expiring))
        .with_capability("d", capability("d", expiring));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert_eq!(outcome.results.len(), 4);
    let refreshed: Vec<&str> = outcome
        .results
        .iter()
        .filter(|r| r.refreshed)
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(refreshed, vec!["a", "c"]);
    for failed in outcome.results.iter().filter(|r| !r.refreshed) {
        assert_eq!(failed.error.as_ref().unwrap().kind(), ErrorKind::Transient);
    }

    let updated = outcome.config.unwrap();
    assert_eq!(updated.capabilities["a"].id, "a:refreshed");
    assert_eq!(updated.capabilities["b"].id, "b");
    assert_eq!(updated.capabilities["c"].id, "c:refreshed");
    assert_eq!(updated.capabilities["d"].id, "d");

    // Failed capabilities keep their past due time, so the floor applies
    assert_eq!(outcome.refresh.after, Some(clock.now() + ChronoDuration::minutes(5)));
}

#[tokio::test]
async fn test_invalid_response_keeps_original_capability() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(
        FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None))).malformed(&["edv"]),
    );
    let engine = engine(&authority, &clock, RefreshSettings::default());
    let config = config(&clock)
        .with_capability("edv", capability("edv", clock.now() + ChronoDuration::days(1)));

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert!(outcome.config.is_none());
    let result = &outcome.results[0];
    assert!(!result.refreshed);
    assert_eq!(result.capability.id, "edv");
    assert_eq!(result.error.as_ref().unwrap().kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_missing_policy_disables_refresh() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(FakeAuthority::new(
        &clock,
        Err(Error::not_found("refresh policy", "config-1")),
    ));
    let engine = engine(&authority, &clock, RefreshSettings::default());

    let outcome = engine.refresh(SERVICE, &config(&clock), &CancelSignal::never()).await;

    assert!(!outcome.refresh.enabled);
    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_transient_policy_failure_retries_later() {
    let clock = ManualClock::starting_now();
    let settings = RefreshSettings::default();
    let authority = Arc::new(FakeAuthority::new(
        &clock,
        Err(Error::network("https://tenant.example/refresh/policy", "503")),
    ));
    let engine = engine(&authority, &clock, settings.clone());

    let outcome = engine.refresh(SERVICE, &config(&clock), &CancelSignal::never()).await;

    assert!(outcome.refresh.enabled);
    assert_eq!(outcome.refresh.after, Some(clock.now() + ChronoDuration::days(1)));
    assert!(outcome.error.unwrap().is_transient());
    assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_preserves_completed_results() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(
        FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None)))
            .with_latency(Duration::from_secs(1)),
    );
    let settings = RefreshSettings {
        concurrency: 1,
        ..RefreshSettings::default()
    };
    let engine = engine(&authority, &clock, settings);
    let expiring = clock.now() + ChronoDuration::days(1);
    let config = config(&clock)
        .with_capability("a", capability("a", expiring))
        .with_capability("b", capability("b", expiring))
        .with_capability("c", capability("c", expiring));

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.cancel();
    });

    let outcome = engine.refresh(SERVICE, &config, &signal).await;

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.refreshed_count(), 1);
    assert_eq!(outcome.error.as_ref().unwrap().kind(), ErrorKind::Cancelled);
    for skipped in outcome.results.iter().filter(|r| !r.refreshed) {
        assert_eq!(skipped.error.as_ref().unwrap().kind(), ErrorKind::Cancelled);
    }
    // Only the first two ever reached the authority
    assert_eq!(authority.refresh_calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.config.unwrap().capabilities.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_requests_are_rate_limited() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None))));
    let settings = RefreshSettings {
        rate_limit: 2,
        rate_window_ms: 1000,
        ..RefreshSettings::default()
    };
    let engine = engine(&authority, &clock, settings);
    let expiring = clock.now() + ChronoDuration::days(1);
    let mut config = config(&clock);
    for name in ["a", "b", "c", "d", "e"] {
        config = config.with_capability(name, capability(name, expiring));
    }

    let start = Instant::now();
    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert_eq!(outcome.refreshed_count(), 5);
    let mut times = authority.call_times.lock().unwrap().clone();
    times.sort();
    for window in times.windows(3) {
        assert!(window[2] - window[0] >= Duration::from_secs(1));
    }
    assert!(times[4] - start >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_caps_simultaneous_requests() {
    let clock = ManualClock::starting_now();
    let authority = Arc::new(
        FakeAuthority::new(&clock, Ok(RefreshPolicy::enabled(None)))
            .with_latency(Duration::from_millis(200)),
    );
    let settings = RefreshSettings::default();
    let concurrency = settings.concurrency;
    let engine = engine(&authority, &clock, settings);
    let expiring = clock.now() + ChronoDuration::days(1);
    let mut config = config(&clock);
    for name in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"] {
        config = config.with_capability(name, capability(name, expiring));
    }

    let outcome = engine.refresh(SERVICE, &config, &CancelSignal::never()).await;

    assert_eq!(outcome.refreshed_count(), 10);
    assert_eq!(authority.peak_in_flight.load(Ordering::SeqCst), concurrency);
    assert_eq!(authority.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(*authority.policy_requesters.lock().unwrap(), vec![SERVICE.to_string()]);
}
