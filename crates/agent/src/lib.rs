//! Ephemeral agents for caplife
//!
//! A tenant's capabilities are re-delegated from the slow long-lived service
//! identity to a locally generated Ed25519 agent. The resulting bundle is
//! cached until its weakest capability expires and rotated ahead of that.

pub mod agent;
pub mod provider;

pub use agent::{EphemeralAgent, EPHEMERAL_CONTROLLER_PREFIX};
pub use provider::{AgentKey, AgentRecord, EphemeralAgentProvider, AGENT_CACHE};
