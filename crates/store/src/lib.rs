//! Document storage for caplife
//!
//! ## Key Components
//!
//! - **`backing`**: the conditional-write contract a backing database must
//!   honour, and an in-memory implementation.
//! - **`document_store`**: the compare-and-swap document store with its
//!   read cache.
//! - **`provider`**: per-tenant store handles opened with ephemeral agents.
//! - **`identity`**: service identities persisted as documents.

pub mod backing;
pub mod document_store;
pub mod identity;
pub mod provider;

pub use backing::{BackingStore, DocumentQuery, MemoryBackingStore};
pub use document_store::{document_id, DeleteOutcome, DocumentStore, Mutator, MutatorInput};
pub use identity::{ServiceIdentityRegistry, SERVICE_IDENTITY_TYPE};
pub use provider::{StoreConnector, StoreHandle, StoreProvider, STORE_CACHE};
