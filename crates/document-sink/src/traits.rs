//! DocumentStoreClient trait definition.
//!
//! One capability set for every destination. The implementation is chosen
//! once when the pipeline is composed; nothing downstream branches on the
//! store flavour or version.

use anyhow::Result;
use serde_json::Value;

use crate::bulk::{BulkOperation, BulkResponse};
use crate::search::{SearchHit, SearchRequest};

/// Trait for talking to the destination document store.
///
/// # Usage Pattern
///
/// The store is picked at startup and shared as a trait object:
///
/// ```ignore
/// let store: Arc<dyn DocumentStoreClient> = if dry_run {
///     Arc::new(MemoryDocumentStore::new())
/// } else {
///     Arc::new(elasticsearch_connect(&opts).await?)
/// };
/// let engine = BatchFlushEngine::new(store.clone(), config);
/// ```
#[async_trait::async_trait]
pub trait DocumentStoreClient: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Whether the container (index) exists.
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create a container, applying `mapping` when given.
    async fn create_index(&self, index: &str, mapping: Option<&Value>) -> Result<()>;

    /// Write a batch of documents in one request.
    ///
    /// Transport failures are returned as `Err`. Per-item failures reported
    /// by the store come back inside the [`BulkResponse`].
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse>;

    /// Run a search against an index pattern.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}
