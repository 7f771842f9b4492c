//! In-memory document store.
//!
//! Documents live in a `BTreeMap` keyed by id, so queries return them in id order and continuation
//! tokens are simply the last id served. That keeps paging stable even when the caller rewrites
//! documents between pages so that they stop matching the filter.
//!
//! Failures can be injected per operation for exercising the job's error handling.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::document::Document;
use crate::errors::{Error, Result};

use super::{DocumentStore, Filter, Page};

pub const DEFAULT_PARTITION_KEY_PATH: &str = "_partitionKey";

/// Failure to return instead of performing an operation.
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    Conflict(String),
    NotFound(String),
    Status(u16, String),
}

impl InjectedFailure {
    fn to_error(&self) -> Error {
        match self {
            InjectedFailure::Conflict(message) => Error::Conflict {
                message: message.clone(),
            },
            InjectedFailure::NotFound(message) => Error::NotFound {
                resource: "document".to_string(),
                message: message.clone(),
            },
            InjectedFailure::Status(status, message) => Error::Status {
                status: *status,
                message: message.clone(),
            },
        }
    }
}

#[derive(Default)]
struct Failures {
    query: Option<String>,
    read: HashMap<String, InjectedFailure>,
    replace: HashMap<String, InjectedFailure>,
}

#[derive(Default)]
struct Counters {
    queries: AtomicUsize,
    reads: AtomicUsize,
    replaces: AtomicUsize,
}

/// In-memory implementation of [`DocumentStore`].
///
/// Cloning shares the underlying documents.
#[derive(Clone)]
pub struct InMemoryStore {
    documents: Arc<RwLock<BTreeMap<String, Document>>>,
    failures: Arc<RwLock<Failures>>,
    counters: Arc<Counters>,
    partition_key_path: String,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            failures: Arc::new(RwLock::new(Failures::default())),
            counters: Arc::new(Counters::default()),
            partition_key_path: DEFAULT_PARTITION_KEY_PATH.to_string(),
        }
    }

    /// Seed the store. Documents without an id are ignored.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        for document in documents {
            store.insert(document);
        }
        store
    }

    pub fn with_partition_key_path(mut self, path: impl Into<String>) -> Self {
        self.partition_key_path = path.into();
        self
    }

    /// Insert or overwrite a document, returning false if it has no id.
    pub fn insert(&self, document: Document) -> bool {
        let Some(id) = document.id().map(str::to_string) else {
            return false;
        };
        self.documents.write().insert(id, document);
        true
    }

    /// Current stored version of a document.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    /// Snapshot of every stored document in id order.
    pub fn snapshot(&self) -> Vec<Document> {
        self.documents.read().values().cloned().collect()
    }

    /// Make every query page request fail.
    pub fn fail_queries(&self, message: &str) {
        self.failures.write().query = Some(message.to_string());
    }

    pub fn fail_read(&self, id: &str, failure: InjectedFailure) {
        self.failures.write().read.insert(id.to_string(), failure);
    }

    pub fn fail_replace(&self, id: &str, failure: InjectedFailure) {
        self.failures.write().replace.insert(id.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        *self.failures.write() = Failures::default();
    }

    pub fn query_count(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn replace_count(&self) -> usize {
        self.counters.replaces.load(Ordering::SeqCst)
    }

    fn check_partition(&self, stored: &Document, id: &str, partition_key: &Value) -> Result<()> {
        if stored.partition_key(&self.partition_key_path)? == *partition_key {
            Ok(())
        } else {
            Err(Error::NotFound {
                resource: "document".to_string(),
                message: format!("{id} does not exist in partition {partition_key}"),
            })
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryStore {
    async fn query_page(&self, filter: &Filter, page_size: usize, continuation: Option<String>) -> Result<Page> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failures.read().query {
            return Err(Error::Status {
                status: 503,
                message: message.clone(),
            });
        }

        let documents = self.documents.read();
        let lower = match &continuation {
            Some(last_id) => Bound::Excluded(last_id.clone()),
            None => Bound::Unbounded,
        };

        let mut matching = documents
            .range((lower, Bound::Unbounded))
            .filter(|(_, document)| filter.matches(document))
            .map(|(_, document)| document.clone());

        let page: Vec<Document> = matching.by_ref().take(page_size.max(1)).collect();
        let has_more = matching.next().is_some();

        let continuation = if has_more {
            page.last().and_then(Document::id).map(str::to_string)
        } else {
            None
        };

        Ok(Page {
            documents: page.into_iter().map(Document::into_value).collect(),
            continuation,
        })
    }

    async fn read(&self, id: &str, partition_key: &Value) -> Result<Document> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.failures.read().read.get(id) {
            return Err(failure.to_error());
        }

        let documents = self.documents.read();
        let stored = documents.get(id).ok_or_else(|| Error::NotFound {
            resource: "document".to_string(),
            message: id.to_string(),
        })?;
        self.check_partition(stored, id, partition_key)?;
        Ok(stored.clone())
    }

    async fn replace(&self, id: &str, partition_key: &Value, document: &Document) -> Result<Document> {
        self.counters.replaces.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.failures.read().replace.get(id) {
            return Err(failure.to_error());
        }

        if document.id() != Some(id) {
            return Err(Error::Status {
                status: 400,
                message: format!("body id {:?} does not match {id}", document.id()),
            });
        }

        let mut documents = self.documents.write();
        let stored = documents.get_mut(id).ok_or_else(|| Error::NotFound {
            resource: "document".to_string(),
            message: id.to_string(),
        })?;
        self.check_partition(stored, id, partition_key)?;

        *stored = document.clone();
        Ok(document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_query_page_continuation_survives_rewrites() {
        let store = InMemoryStore::with_documents((0..4).map(|i| doc(json!({"id": format!("m{i}")}))));
        let filter = Filter::not_defined("usage");

        let first = store.query_page(&filter, 2, None).await.unwrap();
        assert_eq!(first.documents.len(), 2);
        assert_eq!(first.continuation.as_deref(), Some("m1"));

        // Rewriting served documents so they no longer match must not shift the next page
        for entry in &first.documents {
            let mut changed = doc(entry.clone());
            changed.set_usage(&crate::document::Usage::empty());
            store.insert(changed);
        }

        let second = store.query_page(&filter, 2, first.continuation).await.unwrap();
        let ids: Vec<_> = second.documents.iter().filter_map(|entry| entry["id"].as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
        assert!(second.continuation.is_none());
    }

    #[tokio::test]
    async fn test_read_checks_partition_key() {
        let store = InMemoryStore::with_documents([doc(json!({"id": "m1", "_partitionKey": "u1"}))]);

        assert!(store.read("m1", &json!("u1")).await.is_ok());
        assert!(matches!(
            store.read("m1", &json!("u2")).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.read("missing", &json!("u1")).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_overwrites_whole_body() {
        let store = InMemoryStore::with_documents([doc(json!({"id": "m1", "role": "assistant", "usage": {}}))]);

        let replacement = doc(json!({"id": "m1", "role": "assistant"}));
        store.replace("m1", &json!("m1"), &replacement).await.unwrap();

        assert_eq!(store.get("m1").unwrap(), replacement);
        assert_eq!(store.replace_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_rejects_mismatched_body_and_missing_document() {
        let store = InMemoryStore::with_documents([doc(json!({"id": "m1"}))]);

        let other = doc(json!({"id": "m2"}));
        assert!(matches!(
            store.replace("m1", &json!("m1"), &other).await,
            Err(Error::Status { status: 400, .. })
        ));
        assert!(matches!(
            store.replace("m2", &json!("m2"), &other).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_replace_failure() {
        let store = InMemoryStore::with_documents([doc(json!({"id": "m1"}))]);
        store.fail_replace("m1", InjectedFailure::Conflict("etag mismatch".into()));

        let result = store.replace("m1", &json!("m1"), &doc(json!({"id": "m1", "x": 1}))).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));
        assert_eq!(store.get("m1").unwrap(), doc(json!({"id": "m1"})));

        store.clear_failures();
        assert!(store.replace("m1", &json!("m1"), &doc(json!({"id": "m1", "x": 1}))).await.is_ok());
    }
}
