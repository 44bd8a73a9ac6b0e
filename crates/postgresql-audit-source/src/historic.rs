//! Backlog scan.

use std::sync::Arc;

use anyhow::Result;
use batch_flush::BatchFlushEngine;
use sync_core::{key_from_value, ChangeEvent, EventColumns};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::AuditSource;

/// What a backlog scan did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Rows handed to the engine
    pub rows: u64,
    /// Highest primary key handed to the engine
    pub max_key: Option<i64>,
    /// Rows dropped because they could not be turned into events
    pub rejected: u64,
    /// The scan stopped early on cancellation
    pub cancelled: bool,
}

/// Pages the audit backlog into the flush engine, oldest first.
pub struct HistoricScanner {
    source: Arc<dyn AuditSource>,
    engine: BatchFlushEngine,
    columns: EventColumns,
}

impl HistoricScanner {
    pub fn new(source: Arc<dyn AuditSource>, engine: BatchFlushEngine, columns: EventColumns) -> Self {
        Self {
            source,
            engine,
            columns,
        }
    }

    /// Enqueue every row with key above `since_exclusive`.
    ///
    /// Rows are read in pages of the engine's batch size. After each page
    /// full batches are flushed before the next page is read, so the queue
    /// stays bounded; a flush failure ends the scan with that error.
    pub async fn scan(
        &self,
        since_exclusive: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let page_size = self.engine.config().max_items;
        match since_exclusive {
            Some(since) => info!(
                since,
                "Processing historic audit above the last indexed {}", self.columns.key_column
            ),
            None => info!("Loading all available audit data for backlog processing"),
        }

        let mut cursor = self.source.open_cursor(since_exclusive).await?;
        let mut summary = ScanSummary::default();

        loop {
            if cancel.is_cancelled() {
                info!(rows = summary.rows, "Backlog scan cancelled");
                summary.cancelled = true;
                break;
            }

            let rows = cursor.read(page_size).await?;
            if rows.is_empty() {
                break;
            }
            debug!(rows = rows.len(), "Read backlog page");

            for row in rows {
                let key = row.get(&self.columns.key_column).and_then(key_from_value);
                if let (Some(key), Some(since)) = (key, since_exclusive) {
                    if key <= since {
                        debug!(key, since, "Skipping already indexed row");
                        continue;
                    }
                }

                let event = match ChangeEvent::from_attributes(row, &self.columns) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(key = ?key, "Dropping backlog row: {e}");
                        summary.rejected += 1;
                        continue;
                    }
                };
                let key = event.primary_key();
                summary.max_key = Some(summary.max_key.map_or(key, |max| max.max(key)));
                summary.rows += 1;
                self.engine.enqueue(event);
            }

            while self.engine.pending_len() >= page_size {
                self.engine.flush().await?;
            }
        }

        if let Err(e) = cursor.close().await {
            warn!("Failed to close backlog cursor: {e:#}");
        }

        if summary.rows == 0 && !summary.cancelled {
            info!("No historic rows to process");
        } else {
            info!(
                rows = summary.rows,
                max_key = ?summary.max_key,
                rejected = summary.rejected,
                "Finished processing historic rows"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{audit_row, MemoryAuditSource};
    use batch_flush::EngineConfig;
    use document_sink::{DocumentStoreClient, MemoryDocumentStore};
    use serde_json::json;

    fn scanner(
        source: &Arc<MemoryAuditSource>,
        store: &Arc<MemoryDocumentStore>,
        max_items: usize,
    ) -> (HistoricScanner, BatchFlushEngine) {
        let store: Arc<dyn DocumentStoreClient> = store.clone();
        let engine = BatchFlushEngine::new(
            store,
            EngineConfig::default().with_max_items(max_items),
        );
        let source: Arc<dyn AuditSource> = source.clone();
        (
            HistoricScanner::new(source, engine.clone(), EventColumns::default()),
            engine,
        )
    }

    #[tokio::test]
    async fn test_scan_above_watermark_in_ascending_order() {
        let source = Arc::new(MemoryAuditSource::new());
        for key in (95..=110).rev() {
            source.insert_row(audit_row(key, "users")).await;
        }
        let store = Arc::new(MemoryDocumentStore::new());
        let (scanner, engine) = scanner(&source, &store, 100);

        let summary = scanner
            .scan(Some(100), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.rows, 10);
        assert_eq!(summary.max_key, Some(110));
        assert!(!summary.cancelled);
        assert_eq!(engine.pending_keys(), (101..=110).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_scan_everything_without_watermark() {
        let source = Arc::new(MemoryAuditSource::new());
        for key in 1..=7 {
            source.insert_row(audit_row(key, "users")).await;
        }
        let store = Arc::new(MemoryDocumentStore::new());
        let (scanner, engine) = scanner(&source, &store, 3);

        let summary = scanner.scan(None, &CancellationToken::new()).await.unwrap();
        engine.drain().await.unwrap();

        assert_eq!(summary.rows, 7);
        assert_eq!(summary.max_key, Some(7));
        let flat: Vec<String> = store
            .bulk_calls()
            .await
            .into_iter()
            .flatten()
            .map(|op| op.id)
            .collect();
        assert_eq!(flat, vec!["1", "2", "3", "4", "5", "6", "7"]);
        assert!(source.cursor_closed().await);
    }

    #[tokio::test]
    async fn test_scan_skips_rows_at_or_below_watermark() {
        // A cursor may hand back rows the filter should have excluded
        let source = Arc::new(MemoryAuditSource::new().ignoring_cursor_filter());
        for key in [99, 100, 101] {
            source.insert_row(audit_row(key, "users")).await;
        }
        let store = Arc::new(MemoryDocumentStore::new());
        let (scanner, engine) = scanner(&source, &store, 10);

        let summary = scanner
            .scan(Some(100), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(engine.pending_keys(), vec![101]);
    }

    #[tokio::test]
    async fn test_scan_drops_rows_without_timestamp() {
        let source = Arc::new(MemoryAuditSource::new());
        source.insert_row(audit_row(1, "users")).await;
        source
            .insert_row(
                json!({"event_id": 2, "table_name": "users"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await;
        let store = Arc::new(MemoryDocumentStore::new());
        let (scanner, engine) = scanner(&source, &store, 10);

        let summary = scanner.scan(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(engine.pending_keys(), vec![1]);
    }

    #[tokio::test]
    async fn test_cancelled_scan_reads_nothing_more() {
        let source = Arc::new(MemoryAuditSource::new());
        for key in 1..=5 {
            source.insert_row(audit_row(key, "users")).await;
        }
        let store = Arc::new(MemoryDocumentStore::new());
        let (scanner, engine) = scanner(&source, &store, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = scanner.scan(None, &cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.rows, 0);
        assert_eq!(engine.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_flush_failure_during_scan_is_an_error() {
        let source = Arc::new(MemoryAuditSource::new());
        for key in 1..=4 {
            source.insert_row(audit_row(key, "users")).await;
        }
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_unreachable(true).await;
        let (scanner, engine) = scanner(&source, &store, 2);

        assert!(scanner.scan(None, &CancellationToken::new()).await.is_err());
        assert_eq!(engine.pending_keys(), vec![1, 2]);
    }
}
