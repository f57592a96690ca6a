//! Documents kept in the per-tenant encrypted store

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document
///
/// `sequence` is 0 on creation and grows by exactly one per accepted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub content: Value,
    pub meta: Value,
    pub sequence: u64,
}

impl DocumentRecord {
    /// The logical id of the document, `content.id`
    pub fn content_id(&self) -> Result<&str> {
        content_id(&self.content)
    }

    /// `meta.type`, if present
    pub fn doc_type(&self) -> Option<&str> {
        self.meta.get("type").and_then(Value::as_str)
    }
}

/// Read `id` out of a document's content
pub fn content_id(content: &Value) -> Result<&str> {
    content
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::configuration("document content must have a non-empty string 'id'"))
}

/// Address of a document: its logical content id or the storage id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentRef {
    ContentId(String),
    DocumentId(String),
}
