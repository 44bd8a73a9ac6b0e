//! In-process document store.
//!
//! Used for `--dry-run` and by tests across the workspace. Failure injection
//! hooks let tests exercise the flush engine's retry paths without a server.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;
use sync_core::parse_timestamp;
use tokio::sync::Mutex;
use tracing::debug;

use crate::action::BulkAction;
use crate::bulk::{BulkItemResult, BulkOperation, BulkResponse};
use crate::search::{SearchHit, SearchRequest};
use crate::traits::DocumentStoreClient;

#[derive(Debug, Default)]
struct Index {
    mapping: Option<Value>,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, Index>,
    create_calls: Vec<String>,
    bulk_calls: Vec<Vec<BulkOperation>>,
    failing_bulks: usize,
    failing_creates: usize,
    rejected_ids: HashSet<String>,
    create_delay: Option<Duration>,
    unreachable: bool,
}

/// Document store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<State>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the store could not be reached.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Fail the next `count` bulk requests with a transport error.
    pub async fn fail_next_bulks(&self, count: usize) {
        self.state.lock().await.failing_bulks = count;
    }

    /// Fail the next `count` index creations.
    pub async fn fail_next_creates(&self, count: usize) {
        self.state.lock().await.failing_creates = count;
    }

    /// Answer bulk items with this document id with a `400` item error.
    pub async fn reject_document(&self, id: impl ToString) {
        self.state.lock().await.rejected_ids.insert(id.to_string());
    }

    pub async fn accept_document(&self, id: impl ToString) {
        self.state.lock().await.rejected_ids.remove(&id.to_string());
    }

    /// Delay index creation, widening the window for concurrent creators.
    pub async fn set_create_delay(&self, delay: Duration) {
        self.state.lock().await.create_delay = Some(delay);
    }

    /// Store a document directly, bypassing bulk.
    pub async fn insert_document(&self, index: &str, id: impl ToString, document: Value) {
        let mut state = self.state.lock().await;
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), document);
    }

    pub async fn document(&self, index: &str, id: impl ToString) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .and_then(|i| i.documents.get(&id.to_string()).cloned())
    }

    /// Total number of documents across all indices.
    pub async fn document_count(&self) -> usize {
        let state = self.state.lock().await;
        state.indices.values().map(|i| i.documents.len()).sum()
    }

    /// Ids held by `index`, in ascending numeric order where ids are numeric.
    pub async fn document_ids(&self, index: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state
            .indices
            .get(index)
            .map(|i| i.documents.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort_by(|a, b| match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        });
        ids
    }

    pub async fn indices(&self) -> Vec<String> {
        self.state.lock().await.indices.keys().cloned().collect()
    }

    pub async fn mapping(&self, index: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state.indices.get(index).and_then(|i| i.mapping.clone())
    }

    /// Names passed to `create_index`, in call order.
    pub async fn create_index_calls(&self) -> Vec<String> {
        self.state.lock().await.create_calls.clone()
    }

    /// Operations of every bulk request that reached the store.
    pub async fn bulk_calls(&self) -> Vec<Vec<BulkOperation>> {
        self.state.lock().await.bulk_calls.clone()
    }

    async fn check_reachable(&self) -> Result<()> {
        if self.state.lock().await.unreachable {
            bail!("No living connections: document store is unreachable");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStoreClient for MemoryDocumentStore {
    async fn ping(&self) -> Result<()> {
        self.check_reachable().await
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.check_reachable().await?;
        Ok(self.state.lock().await.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, mapping: Option<&Value>) -> Result<()> {
        self.check_reachable().await?;
        let delay = {
            let mut state = self.state.lock().await;
            state.create_calls.push(index.to_string());
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            bail!("Injected failure creating index '{index}'");
        }
        if state.indices.contains_key(index) {
            bail!("resource_already_exists_exception: index [{index}] already exists");
        }
        state.indices.insert(
            index.to_string(),
            Index {
                mapping: mapping.cloned(),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        self.check_reachable().await?;
        let mut state = self.state.lock().await;
        if state.failing_bulks > 0 {
            state.failing_bulks -= 1;
            bail!("Injected bulk transport failure");
        }
        state.bulk_calls.push(operations.to_vec());
        debug!(operations = operations.len(), "Bulk write to in-memory store");

        let mut items = Vec::with_capacity(operations.len());
        for op in operations {
            if state.rejected_ids.contains(&op.id) {
                items.push(BulkItemResult::failed(
                    &op.index,
                    &op.id,
                    400,
                    "mapper_parsing_exception: failed to parse",
                ));
                continue;
            }
            let document: Value = match serde_json::from_str(&op.source) {
                Ok(document) => document,
                Err(e) => {
                    items.push(BulkItemResult::failed(
                        &op.index,
                        &op.id,
                        400,
                        format!("mapper_parsing_exception: {e}"),
                    ));
                    continue;
                }
            };

            let index = state.indices.entry(op.index.clone()).or_default();
            let exists = index.documents.contains_key(&op.id);
            match (op.action, exists) {
                (BulkAction::Create, true) => items.push(BulkItemResult::failed(
                    &op.index,
                    &op.id,
                    409,
                    "version_conflict_engine_exception: document already exists",
                )),
                (_, exists) => {
                    index.documents.insert(op.id.clone(), document);
                    let status = if exists { 200 } else { 201 };
                    items.push(BulkItemResult::ok(&op.index, &op.id, status));
                }
            }
        }
        Ok(BulkResponse::from_items(items))
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.check_reachable().await?;
        let state = self.state.lock().await;

        let mut hits: Vec<SearchHit> = state
            .indices
            .iter()
            .filter(|(name, _)| matches_pattern(&request.index_pattern, name))
            .flat_map(|(name, index)| {
                index.documents.iter().map(move |(id, source)| SearchHit {
                    index: name.clone(),
                    id: id.clone(),
                    source: source.clone(),
                })
            })
            .filter(|hit| match &request.filter {
                Some(filter) => hit.source.get(&filter.field) == Some(&filter.value),
                None => true,
            })
            .collect();

        hits.sort_by(|a, b| {
            let ordering = compare_field(
                a.source.get(&request.sort_field),
                b.source.get(&request.sort_field),
            );
            // Documents missing the sort field go last in either direction
            match (
                a.source.get(&request.sort_field),
                b.source.get(&request.sort_field),
            ) {
                (Some(_), Some(_)) if request.descending => ordering.reverse(),
                _ => ordering,
            }
        });
        hits.truncate(request.size);
        Ok(hits)
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    pattern.split(',').map(str::trim).any(|p| match p.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == p,
    })
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (parse_timestamp(a), parse_timestamp(b)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    a.to_string().cmp(&b.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(action: BulkAction, index: &str, id: i64, body: Value) -> BulkOperation {
        BulkOperation::new(action, index, id, body.to_string())
    }

    #[tokio::test]
    async fn test_bulk_index_overwrites() {
        let store = MemoryDocumentStore::new();
        store
            .bulk(&[op(BulkAction::Index, "audit", 1, json!({"v": 1}))])
            .await
            .unwrap();
        let response = store
            .bulk(&[op(BulkAction::Index, "audit", 1, json!({"v": 2}))])
            .await
            .unwrap();

        assert!(!response.errors);
        assert_eq!(response.items[0].status, 200);
        assert_eq!(store.document("audit", 1).await, Some(json!({"v": 2})));
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn test_bulk_create_conflicts_on_existing_id() {
        let store = MemoryDocumentStore::new();
        store
            .bulk(&[op(BulkAction::Create, "audit", 1, json!({"v": 1}))])
            .await
            .unwrap();
        let response = store
            .bulk(&[op(BulkAction::Create, "audit", 1, json!({"v": 2}))])
            .await
            .unwrap();

        assert!(response.errors);
        assert_eq!(response.items[0].status, 409);
        assert!(response.failures(BulkAction::Create).is_empty());
        assert_eq!(store.document("audit", 1).await, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryDocumentStore::new();
        store.fail_next_bulks(1).await;
        assert!(store
            .bulk(&[op(BulkAction::Index, "audit", 1, json!({}))])
            .await
            .is_err());
        assert!(store
            .bulk(&[op(BulkAction::Index, "audit", 1, json!({}))])
            .await
            .is_ok());

        store.reject_document(2).await;
        let response = store
            .bulk(&[op(BulkAction::Index, "audit", 2, json!({}))])
            .await
            .unwrap();
        assert_eq!(response.failures(BulkAction::Index).len(), 1);

        store.set_unreachable(true).await;
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_create_index_twice_fails() {
        let store = MemoryDocumentStore::new();
        let mapping = json!({"mappings": {"properties": {}}});
        store.create_index("audit", Some(&mapping)).await.unwrap();
        assert!(store.create_index("audit", None).await.is_err());
        assert!(store.index_exists("audit").await.unwrap());
        assert_eq!(store.mapping("audit").await, Some(mapping));
        assert_eq!(store.create_index_calls().await, vec!["audit", "audit"]);
    }

    #[tokio::test]
    async fn test_search_latest_with_filter() {
        let store = MemoryDocumentStore::new();
        store
            .insert_document(
                "audit-users",
                1,
                json!({"event_id": 1, "ts": "2024-03-01T00:00:00Z", "label": "a"}),
            )
            .await;
        store
            .insert_document(
                "audit-orders",
                5,
                json!({"event_id": 5, "ts": "2024-03-03T00:00:00Z", "label": "b"}),
            )
            .await;
        store
            .insert_document(
                "audit-orders",
                3,
                json!({"event_id": 3, "ts": "2024-03-02T00:00:00Z", "label": "a"}),
            )
            .await;
        store
            .insert_document("other", 9, json!({"event_id": 9, "ts": "2025-01-01T00:00:00Z"}))
            .await;

        let hits = store
            .search(&SearchRequest::latest("audit*", "ts"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "5");

        let hits = store
            .search(&SearchRequest::latest("audit*", "ts").with_filter("label", json!("a")))
            .await
            .unwrap();
        assert_eq!(hits[0].id, "3");
        assert_eq!(hits[0].index, "audit-orders");
    }

    #[tokio::test]
    async fn test_search_puts_documents_without_sort_field_last() {
        let store = MemoryDocumentStore::new();
        store.insert_document("audit", 1, json!({"x": 1})).await;
        store
            .insert_document("audit", 2, json!({"ts": "2024-01-01T00:00:00Z"}))
            .await;

        let hits = store
            .search(&SearchRequest::latest("audit", "ts"))
            .await
            .unwrap();
        assert_eq!(hits[0].id, "2");
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("audit*", "audit-users"));
        assert!(matches_pattern("audit", "audit"));
        assert!(!matches_pattern("audit", "audit-users"));
        assert!(matches_pattern("x,audit*", "audit"));
    }
}
