//! Capability refresh for caplife
//!
//! Given a tenant configuration holding a `refresh` capability, the engine
//! asks the tenant's refresh authority for its policy and re-delegates every
//! capability that is close to expiry, under a bounded worker pool and a
//! rolling-window rate limit.

pub mod authority;
pub mod engine;
pub mod schedule;
pub mod validation;

pub use authority::RefreshAuthority;
pub use engine::{CapabilityRefreshEngine, CapabilityRefreshResult, RefreshOutcome, RefreshSchedule};
pub use schedule::{next_attempt, refresh_due_time};
pub use validation::validate_refreshed;
