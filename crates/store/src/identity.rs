//! Persisted service identities
//!
//! Each service type has at most one identity, stored as a document whose
//! content id is the service type. Several processes may start at once, so
//! creation tolerates losing the race and adopts the winner's record.

use crate::document_store::DocumentStore;
use caplife_core::{DocumentRecord, Error, ErrorKind, Result, ServiceIdentity};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// `meta.type` of identity documents
pub const SERVICE_IDENTITY_TYPE: &str = "ServiceIdentity";

const IDENTITY_FIELD: &str = "serviceIdentity";

#[derive(Debug, Clone)]
pub struct ServiceIdentityRegistry {
    store: Arc<DocumentStore>,
}

impl ServiceIdentityRegistry {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// The identity for `service_type`, if one was ever stored
    pub async fn get(&self, service_type: &str) -> Result<Option<ServiceIdentity>> {
        match self.store.get(service_type, true).await {
            Ok(doc) => from_document(&doc).map(Some),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Return the stored identity for `candidate.service_type`, storing
    /// `candidate` if there is none yet
    pub async fn ensure(&self, candidate: ServiceIdentity) -> Result<ServiceIdentity> {
        if let Some(existing) = self.get(&candidate.service_type).await? {
            return Ok(existing);
        }

        let (content, meta) = to_document(&candidate)?;
        match self.store.insert(content, meta).await {
            Ok(doc) => {
                info!(service_type = %candidate.service_type, "service identity created");
                from_document(&doc)
            }
            Err(error) if lost_race(&error) => {
                debug!(service_type = %candidate.service_type, "identity created concurrently, adopting it");
                let doc = self.store.get(&candidate.service_type, false).await?;
                from_document(&doc)
            }
            Err(error) => Err(error),
        }
    }

    /// Persist an edited identity; its sequence must be the stored one
    ///
    /// The returned identity carries the new sequence, which invalidates
    /// every agent derived from the previous version.
    pub async fn save(&self, identity: &ServiceIdentity) -> Result<ServiceIdentity> {
        let (content, meta) = to_document(identity)?;
        let doc = self.store.update(content, meta, identity.sequence + 1).await?;
        from_document(&doc)
    }

    pub async fn list(&self) -> Result<Vec<ServiceIdentity>> {
        self.store
            .find_by_type(SERVICE_IDENTITY_TYPE)
            .await?
            .iter()
            .map(from_document)
            .collect()
    }
}

fn lost_race(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Aborted | ErrorKind::Duplicate | ErrorKind::Conflict
    )
}

fn to_document(identity: &ServiceIdentity) -> Result<(Value, Value)> {
    let content = json!({
        "id": identity.service_type,
        IDENTITY_FIELD: serde_json::to_value(identity)?,
    });
    let meta = json!({ "type": SERVICE_IDENTITY_TYPE });
    Ok((content, meta))
}

fn from_document(doc: &DocumentRecord) -> Result<ServiceIdentity> {
    let stored = doc.content.get(IDENTITY_FIELD).cloned().ok_or_else(|| {
        Error::invalid_state(&doc.id, "document does not hold a service identity")
    })?;
    let mut identity: ServiceIdentity = serde_json::from_value(stored)?;
    identity.sequence = doc.sequence;
    Ok(identity)
}
