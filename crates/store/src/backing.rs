//! Backing document store contract and an in-memory implementation
//!
//! The backing store is the sole arbiter of write races: creation fails with
//! `Duplicate` when the id is taken, and updates are conditional on the
//! stored sequence being exactly one below the proposed one.

use async_trait::async_trait;
use caplife_core::{DocumentRecord, Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

/// Selects documents in a backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentQuery {
    /// By storage id
    Id(String),
    /// By `content.id`
    ContentId(String),
    /// By `meta.type`
    Type(String),
}

impl DocumentQuery {
    pub fn matches(&self, doc: &DocumentRecord) -> bool {
        match self {
            DocumentQuery::Id(id) => &doc.id == id,
            DocumentQuery::ContentId(content_id) => {
                doc.content_id().map(|c| c == content_id).unwrap_or(false)
            }
            DocumentQuery::Type(doc_type) => doc.doc_type() == Some(doc_type.as_str()),
        }
    }
}

/// Persistent storage for one tenant's documents
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn find(&self, query: &DocumentQuery) -> Result<Vec<DocumentRecord>>;

    /// Create `doc` at sequence 0
    ///
    /// `Duplicate` if its id or content id already exists, `InvalidState`
    /// for any other starting sequence.
    async fn insert(&self, doc: DocumentRecord) -> Result<DocumentRecord>;

    /// Replace the stored document only if its sequence is `doc.sequence - 1`
    ///
    /// `NotFound` when there is no document with `doc.id`, `InvalidState`
    /// when the stored sequence does not match.
    async fn update(&self, doc: DocumentRecord) -> Result<DocumentRecord>;

    /// Remove by storage id; `false` if there was nothing to remove
    async fn delete(&self, id: &str) -> Result<bool>;

    /// A fresh unique id for content that has none
    async fn generate_id(&self) -> Result<String>;
}

/// In-process backing store
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    docs: RwLock<BTreeMap<String, DocumentRecord>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn find(&self, query: &DocumentQuery) -> Result<Vec<DocumentRecord>> {
        let docs = self.docs.read();
        let found = match query {
            DocumentQuery::Id(id) => docs.get(id).cloned().into_iter().collect(),
            _ => docs.values().filter(|doc| query.matches(doc)).cloned().collect(),
        };
        Ok(found)
    }

    async fn insert(&self, doc: DocumentRecord) -> Result<DocumentRecord> {
        let content_id = doc.content_id()?.to_string();
        if doc.sequence != 0 {
            return Err(Error::invalid_state(
                &doc.id,
                format!("new documents start at sequence 0, not {}", doc.sequence),
            ));
        }
        let mut docs = self.docs.write();
        let content_taken = docs
            .values()
            .any(|existing| existing.content_id().map(|c| c == content_id).unwrap_or(false));
        if docs.contains_key(&doc.id) || content_taken {
            return Err(Error::duplicate(content_id));
        }
        trace!(id = %doc.id, content_id = %content_id, "inserted document");
        docs.insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    async fn update(&self, doc: DocumentRecord) -> Result<DocumentRecord> {
        let mut docs = self.docs.write();
        let Some(stored) = docs.get_mut(&doc.id) else {
            return Err(Error::not_found("document", &doc.id));
        };
        if doc.sequence.checked_sub(1) != Some(stored.sequence) {
            return Err(Error::invalid_state(
                &doc.id,
                format!(
                    "sequence {} does not follow stored sequence {}",
                    doc.sequence, stored.sequence
                ),
            ));
        }
        trace!(id = %doc.id, sequence = doc.sequence, "updated document");
        *stored = doc.clone();
        Ok(doc)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.docs.write().remove(id).is_some())
    }

    async fn generate_id(&self) -> Result<String> {
        Ok(format!("urn:uuid:{}", uuid::Uuid::new_v4()))
    }
}
