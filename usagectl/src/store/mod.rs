//! Document store capability used by the migration job.
//!
//! The job needs three things from a store: a filtered query served in pages, a point read and a
//! point replace, both addressed by id and partition key. [`cosmos::CosmosStore`] talks to Azure
//! Cosmos DB over its REST API; [`in_memory::InMemoryStore`] keeps documents in process.

use futures::stream::{self, Stream, TryStreamExt};
use serde_json::Value;

use crate::document::Document;
use crate::errors::{Error, Result};

pub mod cosmos;
pub mod filter;
pub mod in_memory;

pub use filter::Filter;

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Raw result entries in query order. A well-formed entry is a JSON object; anything else is
    /// left for the caller to reject per document.
    pub documents: Vec<Value>,
    /// Opaque token for the next page; `None` once the result set is exhausted
    pub continuation: Option<String>,
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one page of documents matching `filter`.
    ///
    /// Pass `None` to start the query and the previous page's continuation afterwards. A page may be
    /// empty while still carrying a continuation.
    async fn query_page(&self, filter: &Filter, page_size: usize, continuation: Option<String>) -> Result<Page>;

    /// Read a single document.
    ///
    /// # Errors
    /// - `NotFound` if no document has this id within the partition
    async fn read(&self, id: &str, partition_key: &Value) -> Result<Document>;

    /// Replace a document's full body, returning the stored version.
    ///
    /// There is no concurrency check: the last write wins.
    ///
    /// # Errors
    /// - `NotFound` if the document no longer exists
    /// - `Conflict` if the store refuses the write
    async fn replace(&self, id: &str, partition_key: &Value, document: &Document) -> Result<Document>;
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily stream every entry matching `filter`, fetching pages on demand.
///
/// Only page failures surface as errors; entries are passed through untouched. Dropping the stream stops further page requests. The stream cannot resume from a saved position;
/// re-run the query to start over.
pub fn query_documents<'a, S>(store: &'a S, filter: &'a Filter, page_size: usize) -> impl Stream<Item = Result<Value>> + Send + 'a
where
    S: DocumentStore + ?Sized,
{
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let continuation = match cursor {
            Cursor::Done => return Ok::<_, Error>(None),
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
        };

        let page = store.query_page(filter, page_size, continuation).await?;
        tracing::debug!(documents = page.documents.len(), more = page.continuation.is_some(), "Fetched query page");

        let next = match page.continuation {
            Some(token) => Cursor::Next(token),
            None => Cursor::Done,
        };
        Ok(Some((page.documents, next)))
    })
    .map_ok(|documents| stream::iter(documents.into_iter().map(Ok)))
    .try_flatten()
}
