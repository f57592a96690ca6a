//! Capability refresh engine
//!
//! One call to [`CapabilityRefreshEngine::refresh`] runs a full cycle for a
//! tenant configuration: fetch the policy through the tenant's refresh
//! capability, re-delegate every capability whose due time has passed, and
//! compute when the next cycle should run. Per-capability failures are
//! reported in the outcome and never abort the other capabilities.

use crate::authority::RefreshAuthority;
use crate::schedule::{next_attempt, refresh_due_time};
use crate::validation::validate_refreshed;
use caplife_config::RefreshSettings;
use caplife_core::{add_duration, Capability, Clock, Error, RefreshPolicy, TenantConfiguration};
use caplife_utils::tracing::refresh_span;
use caplife_utils::{CancelSignal, RateLimiter};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// When the next refresh cycle should run
///
/// Serialized as `{"enabled": false, "after": 0}` when nothing is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSchedule {
    pub enabled: bool,
    /// `None` when nothing is scheduled
    #[serde(default, with = "after_or_zero")]
    pub after: Option<DateTime<Utc>>,
}

/// `after` is a timestamp, or the number `0` for "never"
mod after_or_zero {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        At(DateTime<Utc>),
        Never(u8),
    }

    pub fn serialize<S: Serializer>(after: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match after {
            Some(at) => at.serialize(serializer),
            None => serializer.serialize_u8(0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Wire>::deserialize(deserializer)? {
            Some(Wire::At(at)) => Ok(Some(at)),
            Some(Wire::Never(0)) | None => Ok(None),
            Some(Wire::Never(other)) => Err(serde::de::Error::custom(format!(
                "expected a timestamp or 0, got {other}"
            ))),
        }
    }
}

impl RefreshSchedule {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            after: None,
        }
    }

    pub fn at(after: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            after: Some(after),
        }
    }
}

/// What happened to one capability that was due for refresh
#[derive(Debug, Clone)]
pub struct CapabilityRefreshResult {
    /// Name of the capability in the configuration
    pub name: String,
    /// The capability now in the configuration (new if refreshed)
    pub capability: Capability,
    pub refreshed: bool,
    /// Due time of `capability`
    pub due: DateTime<Utc>,
    pub error: Option<Error>,
}

/// Result of one refresh cycle
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// The updated configuration; `None` when nothing changed
    pub config: Option<TenantConfiguration>,
    pub refresh: RefreshSchedule,
    /// One entry per capability that was due, sorted by name
    pub results: Vec<CapabilityRefreshResult>,
    pub error: Option<Error>,
}

impl RefreshOutcome {
    fn disabled(error: Option<Error>) -> Self {
        Self {
            config: None,
            refresh: RefreshSchedule::disabled(),
            results: Vec::new(),
            error,
        }
    }

    fn retry_at(after: DateTime<Utc>, error: Error) -> Self {
        Self {
            config: None,
            refresh: RefreshSchedule::at(after),
            results: Vec::new(),
            error: Some(error),
        }
    }

    /// Number of capabilities replaced in this cycle
    pub fn refreshed_count(&self) -> usize {
        self.results.iter().filter(|r| r.refreshed).count()
    }
}

/// Refreshes tenant capabilities through a remote authority
pub struct CapabilityRefreshEngine {
    authority: Arc<dyn RefreshAuthority>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    limiter: RateLimiter,
}

impl CapabilityRefreshEngine {
    pub fn new(
        authority: Arc<dyn RefreshAuthority>,
        settings: RefreshSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(settings.rate_limit, settings.rate_window());
        Self {
            authority,
            clock,
            settings,
            limiter,
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Run one refresh cycle for `config` on behalf of `service_type`
    ///
    /// Cancellation stops in-flight requests and skips queued ones; results
    /// already obtained are kept and the outcome carries a `Cancelled` error.
    pub async fn refresh(
        &self,
        service_type: &str,
        config: &TenantConfiguration,
        cancel: &CancelSignal,
    ) -> RefreshOutcome {
        let span = refresh_span(service_type, &config.id, config.sequence);
        self.run(service_type, config, cancel).instrument(span).await
    }

    async fn run(
        &self,
        service_type: &str,
        config: &TenantConfiguration,
        cancel: &CancelSignal,
    ) -> RefreshOutcome {
        let Some(refresh_capability) = config.refresh_capability() else {
            debug!("no refresh capability, refresh not enabled");
            return RefreshOutcome::disabled(None);
        };

        let policy = match self.fetch_policy(service_type, refresh_capability, cancel).await {
            Ok(policy) => policy,
            Err(error) if error.is_permanent_policy_failure() => {
                warn!(error = %error, "refresh policy unavailable, disabling refresh");
                return RefreshOutcome::disabled(Some(error));
            }
            Err(error) => {
                let after = add_duration(self.clock.now(), self.retry_delay_for(&error));
                warn!(error = %error, %after, "refresh policy fetch failed, will retry");
                return RefreshOutcome::retry_at(after, error);
            }
        };

        if policy.is_disabled() {
            info!("refresh disabled by policy");
            return RefreshOutcome::disabled(None);
        }

        let max_ttl = policy
            .max_ttl_before_refresh()
            .unwrap_or_else(|| self.settings.default_max_ttl_before_refresh());
        let skew = self.settings.clock_skew();
        let now = self.clock.now();

        let mut due_times: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        let mut due = Vec::new();
        for (name, capability) in &config.capabilities {
            let due_at = refresh_due_time(capability.expires, skew, max_ttl);
            due_times.insert(name.as_str(), due_at);
            if now >= due_at {
                due.push((name.as_str(), capability));
            } else {
                debug!(capability = %name, due = %due_at, "capability not due");
            }
        }

        let mut results: Vec<CapabilityRefreshResult> = stream::iter(due)
            .map(|(name, capability)| {
                self.refresh_one(refresh_capability, name, capability, max_ttl, cancel)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.name.cmp(&b.name));

        let mut replacements = BTreeMap::new();
        for result in &results {
            if let Some(due_at) = due_times.get_mut(result.name.as_str()) {
                *due_at = result.due;
            }
            if result.refreshed {
                replacements.insert(result.name.clone(), result.capability.clone());
            }
        }

        let now = self.clock.now();
        let after = match due_times.values().min() {
            Some(earliest) => next_attempt(*earliest, now, self.settings.safety_floor()),
            None => add_duration(now, self.settings.transient_retry_delay()),
        };

        let error = cancel
            .is_cancelled()
            .then(|| Error::cancelled(format!("refresh of configuration '{}'", config.id)));

        let updated = if replacements.is_empty() {
            None
        } else {
            Some(config.next_version(replacements))
        };

        info!(
            due = results.len(),
            refreshed = results.iter().filter(|r| r.refreshed).count(),
            %after,
            cancelled = error.is_some(),
            "refresh cycle complete"
        );

        RefreshOutcome {
            config: updated,
            refresh: RefreshSchedule::at(after),
            results,
            error,
        }
    }

    async fn fetch_policy(
        &self,
        service_type: &str,
        refresh_capability: &Capability,
        cancel: &CancelSignal,
    ) -> caplife_core::Result<RefreshPolicy> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("refresh policy fetch"));
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled("refresh policy fetch")),
            policy = self.authority.fetch_policy(service_type, refresh_capability) => policy,
        }
    }

    /// A cancelled fetch is retried after the safety floor, other failures
    /// after the transient delay
    fn retry_delay_for(&self, error: &Error) -> Duration {
        match error {
            Error::Cancelled { .. } => self.settings.safety_floor(),
            _ => self.settings.transient_retry_delay(),
        }
    }

    async fn refresh_one(
        &self,
        refresh_capability: &Capability,
        name: &str,
        capability: &Capability,
        max_ttl: Duration,
        cancel: &CancelSignal,
    ) -> CapabilityRefreshResult {
        let skew = self.settings.clock_skew();
        let keep = |error: Error| CapabilityRefreshResult {
            name: name.to_string(),
            capability: capability.clone(),
            refreshed: false,
            due: refresh_due_time(capability.expires, skew, max_ttl),
            error: Some(error),
        };

        if cancel.is_cancelled() {
            return keep(Error::cancelled(format!("refresh of capability '{name}'")));
        }

        let attempt = async {
            self.limiter.acquire().await;
            debug!(capability = %name, id = %capability.id, "refreshing capability");
            let response = self
                .authority
                .refresh_capability(refresh_capability, capability)
                .await?;
            validate_refreshed(capability, response, self.clock.now())
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled(format!("refresh of capability '{name}'"))),
            outcome = attempt => outcome,
        };

        match outcome {
            Ok(refreshed) => {
                debug!(
                    capability = %name,
                    id = %refreshed.id,
                    expires = %refreshed.expires,
                    "capability refreshed"
                );
                CapabilityRefreshResult {
                    name: name.to_string(),
                    due: refresh_due_time(refreshed.expires, skew, max_ttl),
                    capability: refreshed,
                    refreshed: true,
                    error: None,
                }
            }
            Err(error) => {
                warn!(capability = %name, id = %capability.id, error = %error, "capability refresh failed");
                keep(error)
            }
        }
    }
}

impl std::fmt::Debug for CapabilityRefreshEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRefreshEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
