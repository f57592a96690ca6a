//! Shared runtime utilities for caplife
//!
//! This crate provides the resilience primitives (retry budgets, rate
//! limiting), cooperative cancellation and tracing setup used throughout the
//! caplife workspace.

pub mod resilience;
pub mod sync;
pub mod tracing;

pub use resilience::*;
pub use sync::*;
