//! Optimistic-concurrency document store
//!
//! Writes follow a compare-and-swap loop: read the current document, let the
//! mutator decide what to write, attempt a conditional write, and on a lost
//! race re-read and try again. A mutator aborting is final and never retried.

use crate::backing::{BackingStore, DocumentQuery};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use caplife_config::StoreSettings;
use caplife_core::{content_id, DocumentRecord, DocumentRef, Error, Result};
use caplife_utils::tracing::upsert_span;
use caplife_utils::RetryConfig;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, Instrument};

/// What a mutator sees for one write attempt
#[derive(Debug, Clone, Copy)]
pub struct MutatorInput<'a> {
    /// Storage id the document has or will have
    pub id: &'a str,
    /// The stored document, `None` when creating
    pub doc: Option<&'a DocumentRecord>,
    pub content: &'a Value,
    pub meta: &'a Value,
}

impl MutatorInput<'_> {
    /// The document a plain overwrite would write
    pub fn proposed(&self) -> DocumentRecord {
        DocumentRecord {
            id: self.id.to_string(),
            content: self.content.clone(),
            meta: self.meta.clone(),
            sequence: self.doc.map_or(0, |doc| doc.sequence + 1),
        }
    }
}

/// Decides the document to write, or aborts the upsert with an error
pub type Mutator = dyn Fn(MutatorInput<'_>) -> Result<DocumentRecord> + Send + Sync;

/// Result of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: bool,
}

struct CachedDocument {
    doc: DocumentRecord,
    cached_at: Instant,
}

/// Storage id for a logical document
///
/// Derived from the content id so that concurrent creators of the same
/// document collide in the backing store.
pub fn document_id(content_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(content_id.as_bytes()))
}

/// Document store for one tenant
pub struct DocumentStore {
    backing: Arc<dyn BackingStore>,
    cache: Mutex<LruCache<String, CachedDocument>>,
    cache_ttl: Duration,
    retry: RetryConfig,
}

impl DocumentStore {
    pub fn new(backing: Arc<dyn BackingStore>, settings: &StoreSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.read_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backing,
            cache: Mutex::new(LruCache::new(capacity)),
            cache_ttl: settings.read_cache_ttl(),
            retry: RetryConfig::for_write_conflicts(
                settings.max_retries,
                settings.retry_base_delay(),
                settings.retry_max_delay(),
            ),
        }
    }

    pub fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.backing
    }

    /// Read a document by content id; `NotFound` if it does not exist
    pub async fn get(&self, content_id: &str, use_cache: bool) -> Result<DocumentRecord> {
        if use_cache {
            if let Some(doc) = self.cached(content_id) {
                return Ok(doc);
            }
        }

        let doc = self
            .read(&document_id(content_id))
            .await?
            .ok_or_else(|| Error::not_found("document", content_id))?;

        if use_cache {
            self.cache.lock().put(
                content_id.to_string(),
                CachedDocument {
                    doc: doc.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(doc)
    }

    /// Create or overwrite a document
    ///
    /// Without a mutator, `content` and `meta` replace whatever is stored.
    /// With one, the mutator chooses the document to write for every attempt
    /// and may abort the whole upsert by returning an error. Content without
    /// an `id` gets one from the backing store.
    pub async fn upsert(
        &self,
        mut content: Value,
        meta: Value,
        mutator: Option<&Mutator>,
    ) -> Result<DocumentRecord> {
        if content.get("id").is_none() {
            let generated = self.backing.generate_id().await?;
            match content.as_object_mut() {
                Some(object) => {
                    object.insert("id".to_string(), Value::String(generated));
                }
                None => return Err(Error::configuration("document content must be a JSON object")),
            }
        }
        let content_id = content_id(&content)?.to_string();
        let span = upsert_span(&content_id);

        async {
            self.invalidate_cache(&content_id);
            let result = self.write_loop(&content_id, &content, &meta, mutator).await;
            self.invalidate_cache(&content_id);
            result
        }
        .instrument(span)
        .await
    }

    async fn write_loop(
        &self,
        content_id: &str,
        content: &Value,
        meta: &Value,
        mutator: Option<&Mutator>,
    ) -> Result<DocumentRecord> {
        let id = document_id(content_id);
        let mut attempt = 0;

        loop {
            let existing = self.read(&id).await?;
            let input = MutatorInput {
                id: &id,
                doc: existing.as_ref(),
                content,
                meta,
            };
            let proposed = match mutator {
                Some(mutator) => mutator(input)?,
                None => input.proposed(),
            };
            if proposed.id != id {
                return Err(Error::aborted(content_id, "mutator changed the document id"));
            }
            if existing.is_none() && proposed.sequence != 0 {
                return Err(Error::aborted(
                    content_id,
                    format!("new documents start at sequence 0, not {}", proposed.sequence),
                ));
            }

            let written = match existing {
                None => self.backing.insert(proposed).await,
                Some(_) => self.backing.update(proposed).await.map_err(|error| match error {
                    Error::NotFound { .. } => {
                        Error::invalid_state(content_id, "document deleted during update")
                    }
                    other => other,
                }),
            };

            match written {
                Ok(doc) => {
                    debug!(sequence = doc.sequence, attempts = attempt + 1, "document written");
                    return Ok(doc);
                }
                Err(error) if self.retry.should_retry(&error) => {
                    if attempt >= self.retry.max_retries {
                        return Err(Error::concurrency_conflict(content_id, attempt + 1));
                    }
                    let delay = self.retry.calculate_delay(attempt);
                    debug!(error = %error, attempt, ?delay, "lost write race, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Create a document, aborting if its content id already exists
    pub async fn insert(&self, content: Value, meta: Value) -> Result<DocumentRecord> {
        let create_only = |input: MutatorInput<'_>| match input.doc {
            Some(_) => Err(Error::aborted(
                input.content.get("id").and_then(Value::as_str).unwrap_or_default(),
                "document already exists",
            )),
            None => Ok(input.proposed()),
        };
        self.upsert(content, meta, Some(&create_only)).await
    }

    /// Replace an existing document at exactly `sequence`
    ///
    /// Aborts unless the stored sequence is `sequence - 1`; `NotFound` if the
    /// document does not exist.
    pub async fn update(&self, content: Value, meta: Value, sequence: u64) -> Result<DocumentRecord> {
        let expect_sequence = move |input: MutatorInput<'_>| {
            let content_id = input.content.get("id").and_then(Value::as_str).unwrap_or_default();
            let Some(doc) = input.doc else {
                return Err(Error::not_found("document", content_id));
            };
            if sequence.checked_sub(1) != Some(doc.sequence) {
                return Err(Error::aborted(
                    content_id,
                    format!(
                        "sequence {sequence} does not follow stored sequence {}",
                        doc.sequence
                    ),
                ));
            }
            Ok(DocumentRecord {
                sequence,
                ..input.proposed()
            })
        };
        self.upsert(content, meta, Some(&expect_sequence)).await
    }

    /// Delete by content id or storage id
    ///
    /// Deleting a missing document is not an error. The read cache entry is
    /// dropped either way.
    pub async fn delete(&self, target: DocumentRef) -> Result<DeleteOutcome> {
        let (id, content_id) = match target {
            DocumentRef::ContentId(content_id) => (document_id(&content_id), Some(content_id)),
            DocumentRef::DocumentId(id) => {
                let content_id = self
                    .read(&id)
                    .await?
                    .and_then(|doc| doc.content_id().ok().map(str::to_string));
                (id, content_id)
            }
        };

        let deleted = self.backing.delete(&id).await;

        match &content_id {
            Some(content_id) => self.invalidate_cache(content_id),
            None => self.invalidate_cached_id(&id),
        }

        let deleted = deleted?;
        debug!(id = %id, deleted, "document delete");
        Ok(DeleteOutcome { deleted })
    }

    /// All documents whose `meta.type` is `doc_type`
    pub async fn find_by_type(&self, doc_type: &str) -> Result<Vec<DocumentRecord>> {
        self.backing
            .find(&DocumentQuery::Type(doc_type.to_string()))
            .await
    }

    pub fn invalidate_cache(&self, content_id: &str) {
        self.cache.lock().pop(content_id);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    async fn read(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .backing
            .find(&DocumentQuery::Id(id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    fn cached(&self, content_id: &str) -> Option<DocumentRecord> {
        let mut cache = self.cache.lock();
        let fresh = cache
            .get(content_id)
            .map(|entry| entry.cached_at.elapsed() < self.cache_ttl)?;
        if fresh {
            cache.get(content_id).map(|entry| entry.doc.clone())
        } else {
            cache.pop(content_id);
            None
        }
    }

    fn invalidate_cached_id(&self, id: &str) {
        let mut cache = self.cache.lock();
        let stale: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.doc.id == id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("cached", &self.cache.lock().len())
            .field("cache_ttl", &self.cache_ttl)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
