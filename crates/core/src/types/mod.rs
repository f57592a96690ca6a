//! Data model shared by every caplife component

pub mod capability;
pub mod document;
pub mod identity;
pub mod policy;
pub mod tenant;

pub use capability::{AllowedAction, Capability, DelegationProof, DELEGATION_PROOF_PURPOSE};
pub use document::{content_id, DocumentRecord, DocumentRef};
pub use identity::ServiceIdentity;
pub use policy::{RefreshConstraints, RefreshPolicy, RefreshSetting};
pub use tenant::{TenantConfiguration, REFRESH_CAPABILITY};
