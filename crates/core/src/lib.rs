//! Core domain types, errors, and collaborator contracts for `caplife`.
//!
//! This crate establishes the data model and error handling shared by the
//! rotating cache, the ephemeral agent provider, the capability refresh
//! engine and the document store.
//!
//! ## Key Components
//!
//! - **`errors`**: the `Error` enum, its explicit `ErrorKind` tag and the
//!   `Result` alias.
//! - **`types`**: capabilities, tenant configurations, refresh policies,
//!   documents and service identities.
//! - **`clock`**: the wall-clock abstraction used for every expiry decision.
//! - **`delegation`**: the narrow traits through which signing and
//!   delegation are performed by external collaborators.

pub mod clock;
pub mod delegation;
pub mod errors;
pub mod types;

pub use self::{
    clock::{add_duration, sub_duration, Clock, ManualClock, SystemClock},
    delegation::{CapabilityDelegator, DelegationRequest, Signer, SignerSource},
    errors::{Error, ErrorKind, Result, ResultExt},
    types::*,
};
