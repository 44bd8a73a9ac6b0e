use std::sync::Arc;

use anyhow::{Context, Result};
use batch_flush::BatchFlushEngine;
use document_sink::{DocumentStoreClient, SearchRequest};
use serde_json::Value;
use sync_core::{key_from_value, EventColumns};
use tracing::{debug, info, warn};

/// Reads the highest confirmed key back from the destination.
pub struct WatermarkResolver {
    store: Arc<dyn DocumentStoreClient>,
    engine: BatchFlushEngine,
    columns: EventColumns,
}

impl WatermarkResolver {
    pub fn new(
        store: Arc<dyn DocumentStoreClient>,
        engine: BatchFlushEngine,
        columns: EventColumns,
    ) -> Self {
        Self {
            store,
            engine,
            columns,
        }
    }

    /// The search issued against the destination.
    pub fn request(&self) -> SearchRequest {
        let config = self.engine.config();
        let request = SearchRequest::latest(
            config.naming.search_pattern(),
            &self.columns.timestamp_column,
        );
        match &config.label {
            Some(label) => request.with_filter(&label.name, Value::String(label.value.clone())),
            None => request,
        }
    }

    /// Highest key already indexed, or `None` for an empty destination.
    ///
    /// The current container of every stream is ensured first so the search
    /// never targets an index that does not exist yet. Any destination error
    /// is returned to the caller.
    pub async fn resolve(&self, streams: &[String]) -> Result<Option<i64>> {
        let mut containers: Vec<String> = Vec::new();
        for stream in streams {
            let container = self.engine.container_for(stream);
            if !containers.contains(&container) {
                containers.push(container);
            }
        }
        if streams.is_empty() {
            containers.push(self.engine.container_for(&self.columns.default_stream));
        }
        for container in &containers {
            self.engine.ensure_container_exists(container).await?;
        }

        let request = self.request();
        debug!(pattern = %request.index_pattern, "Looking up the last indexed document");
        let hits = self
            .store
            .search(&request)
            .await
            .with_context(|| {
                format!(
                    "Failed to look up the last indexed document in '{}'",
                    request.index_pattern
                )
            })?;

        let Some(hit) = hits.into_iter().next() else {
            info!(
                pattern = %request.index_pattern,
                "No indexed documents found, starting from the beginning"
            );
            return Ok(None);
        };

        let key_column = &self.columns.key_column;
        match hit.source.get(key_column).and_then(key_from_value) {
            Some(key) => {
                info!(
                    key,
                    container = %hit.index,
                    "Resuming after the last indexed {key_column}"
                );
                Ok(Some(key))
            }
            None => {
                warn!(
                    container = %hit.index,
                    id = %hit.id,
                    "Last indexed document has no usable {key_column}, starting from the beginning"
                );
                Ok(None)
            }
        }
    }
}
