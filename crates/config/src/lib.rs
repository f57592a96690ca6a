//! Configuration for caplife
//!
//! This crate holds the typed settings consumed by the cache, agent, refresh
//! and store crates, and the loader that assembles them at startup.

pub mod loader;
pub mod settings;

pub use loader::*;
pub use settings::*;
