//! Caching for caplife
//!
//! This crate provides the self-rotating expiring cache used for ephemeral
//! agents and store handles:
//! - In-flight coalescing: concurrent misses share one computation
//! - Background rotation ahead of the TTL
//! - Value expiry checked independently of the cache TTL
//! - Bounded capacity with least-recently-used eviction
//! - A registry of named caches that can be reset as a whole

pub mod manager;
pub mod rotating;
pub mod stats;

pub use manager::CacheManager;
pub use rotating::{Expires, RecordId, RotatingCache};
pub use stats::CacheStatistics;
