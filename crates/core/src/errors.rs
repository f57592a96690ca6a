use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result type alias for caplife operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for caplife operations
///
/// Errors are `Clone` because a single failed computation in the rotating
/// cache is observed by every caller that coalesced onto it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A capability failed structural validation
    #[error("capability '{capability_id}' is invalid: {reason}")]
    InvalidCapability {
        capability_id: String,
        reason: String,
    },

    /// A capability (or the earliest of a set) is already past its expiry
    #[error("capability '{capability_id}' expired at {expires}")]
    CapabilityExpired {
        capability_id: String,
        expires: DateTime<Utc>,
    },

    /// The delegation collaborator refused or failed to delegate
    #[error("failed to delegate capability '{capability_id}': {message}")]
    Delegation {
        capability_id: String,
        message: String,
    },

    /// Remote resource or stored record does not exist
    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    /// The invoked capability does not grant the requested action
    #[error("not allowed to access {resource}: {message}")]
    NotAllowed { resource: String, message: String },

    /// Network-related errors
    #[error("network error for '{endpoint}': {message}")]
    Network { endpoint: String, message: String },

    /// Unique constraint violated while creating a record
    #[error("duplicate record '{id}'")]
    Duplicate { id: String },

    /// Conditional write rejected because the stored state moved on
    #[error("invalid state for record '{id}': {message}")]
    InvalidState { id: String, message: String },

    /// A document mutator deliberately cancelled an upsert
    #[error("upsert of '{id}' aborted: {reason}")]
    AbortedByMutator { id: String, reason: String },

    /// Conditional writes kept losing the race
    #[error("concurrent update conflict on '{id}' after {attempts} attempts")]
    ConcurrencyConflict { id: String, attempts: usize },

    /// Cooperative cancellation was requested
    #[error("operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    /// Operation timeout errors
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Backing store failures that are not part of the conflict protocol
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },
}

/// Explicit tag for matching on an error's category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Expired,
    Delegation,
    NotFound,
    NotAllowed,
    Transient,
    Duplicate,
    InvalidState,
    Aborted,
    Conflict,
    Cancelled,
    Serialization,
    Storage,
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
        }
    }
}

impl Error {
    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::InvalidCapability { .. } => ErrorKind::Validation,
            Error::CapabilityExpired { .. } => ErrorKind::Expired,
            Error::Delegation { .. } => ErrorKind::Delegation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::NotAllowed { .. } => ErrorKind::NotAllowed,
            Error::Network { .. } | Error::Timeout { .. } => ErrorKind::Transient,
            Error::Duplicate { .. } => ErrorKind::Duplicate,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::AbortedByMutator { .. } => ErrorKind::Aborted,
            Error::ConcurrencyConflict { .. } => ErrorKind::Conflict,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Json { .. } => ErrorKind::Serialization,
            Error::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Failures worth retrying on a later cycle
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Storage)
    }

    /// Failures that need an operator to fix the remote refresh setup
    pub fn is_permanent_policy_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::NotAllowed)
    }

    /// Storage lost an optimistic-concurrency race
    pub fn is_write_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Duplicate | ErrorKind::InvalidState)
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a capability validation error
    #[must_use]
    pub fn invalid_capability(capability_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidCapability {
            capability_id: capability_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a capability expiry error
    #[must_use]
    pub fn capability_expired(capability_id: impl Into<String>, expires: DateTime<Utc>) -> Self {
        Error::CapabilityExpired {
            capability_id: capability_id.into(),
            expires,
        }
    }

    /// Create a delegation error
    #[must_use]
    pub fn delegation(capability_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Delegation {
            capability_id: capability_id.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a not allowed error
    #[must_use]
    pub fn not_allowed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Error::NotAllowed {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a network error
    #[must_use]
    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate record error
    #[must_use]
    pub fn duplicate(id: impl Into<String>) -> Self {
        Error::Duplicate { id: id.into() }
    }

    /// Create an invalid state (conditional write) error
    #[must_use]
    pub fn invalid_state(id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidState {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a mutator abort; used from inside document mutators
    #[must_use]
    pub fn aborted(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::AbortedByMutator {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a concurrency conflict error
    #[must_use]
    pub fn concurrency_conflict(id: impl Into<String>, attempts: usize) -> Self {
        Error::ConcurrencyConflict {
            id: id.into(),
            attempts,
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a storage error
    #[must_use]
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result, keeping transient errors transient
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|error| match error {
            Error::Configuration { message: inner } => Error::Configuration {
                message: format!("{}: {inner}", message.into()),
            },
            other => other,
        })
    }
}
