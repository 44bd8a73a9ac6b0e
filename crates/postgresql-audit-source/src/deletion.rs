//! Source-row deletion after confirmed writes.

use std::sync::Arc;

use anyhow::Result;
use batch_flush::FlushObserver;
use sync_core::{Batch, DeletionJob};
use tracing::{debug, info, warn};

use crate::historic::ScanSummary;
use crate::source::AuditSource;

/// Keys per `DELETE` statement, below the 65535 bind-parameter cap.
pub const DEFAULT_DELETE_CHUNK_SIZE: usize = 34464;

/// When confirmed rows are deleted from the audit table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletionMode {
    /// Rows are never deleted
    #[default]
    Disabled,
    /// The keys of every confirmed batch are deleted
    PerBatch,
    /// The drained backlog is deleted as one key range
    AfterHistoric,
}

impl DeletionMode {
    pub fn from_flags(delete_on_index: bool, after_historic: bool) -> Self {
        match (delete_on_index, after_historic) {
            (false, _) => Self::Disabled,
            (true, false) => Self::PerBatch,
            (true, true) => Self::AfterHistoric,
        }
    }
}

/// Deletes audit rows once they are known to be in the destination.
pub struct DeletionCoordinator {
    source: Arc<dyn AuditSource>,
    mode: DeletionMode,
    chunk_size: usize,
}

impl DeletionCoordinator {
    pub fn new(source: Arc<dyn AuditSource>, mode: DeletionMode) -> Self {
        Self {
            source,
            mode,
            chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn mode(&self) -> DeletionMode {
        self.mode
    }

    /// Run a job regardless of mode. Returns rows deleted.
    pub async fn execute(&self, job: DeletionJob) -> Result<u64> {
        match job {
            DeletionJob::Keys(keys) => self.delete_keys_chunked(&keys).await,
            DeletionJob::Range {
                low_exclusive,
                high_inclusive,
            } => {
                let deleted = self
                    .source
                    .delete_range(low_exclusive, high_inclusive)
                    .await?;
                info!(
                    low_exclusive = ?low_exclusive,
                    high_inclusive,
                    deleted,
                    "Deleted historic rows from the audit table"
                );
                Ok(deleted)
            }
        }
    }

    /// Delete `keys` one chunk per statement, in order.
    pub async fn delete_keys_chunked(&self, keys: &[i64]) -> Result<u64> {
        let mut total = 0;
        for chunk in keys.chunks(self.chunk_size) {
            let deleted = self.source.delete_keys(chunk).await?;
            debug!(keys = chunk.len(), deleted, "Deleted chunk of audit rows");
            total += deleted;
        }
        if !keys.is_empty() {
            info!(deleted = total, "Deleted audit rows");
        }
        Ok(total)
    }

    /// Range-delete the drained backlog `(previous, scan.max_key]`.
    ///
    /// Does nothing outside [`DeletionMode::AfterHistoric`], when the scan
    /// saw no new rows, or when it rejected rows that the range would cover.
    pub async fn on_historic_drained(
        &self,
        previous: Option<i64>,
        scan: &ScanSummary,
    ) -> Result<u64> {
        if self.mode != DeletionMode::AfterHistoric {
            return Ok(0);
        }
        if scan.rejected > 0 {
            warn!(
                rejected = scan.rejected,
                "Historic scan rejected rows, skipping range delete"
            );
            return Ok(0);
        }
        match DeletionJob::for_drained_backlog(previous, scan.max_key) {
            Some(job) => self.execute(job).await,
            None => {
                debug!("No historic rows to delete");
                Ok(0)
            }
        }
    }
}

#[async_trait::async_trait]
impl FlushObserver for DeletionCoordinator {
    async fn on_batch_confirmed(&self, batch: &Batch) -> Result<()> {
        if self.mode != DeletionMode::PerBatch || batch.is_empty() {
            return Ok(());
        }
        self.delete_keys_chunked(&batch.keys()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{audit_row, MemoryAuditSource};
    use sync_core::{ChangeEvent, EventColumns, PendingItem};

    async fn source_with(keys: impl IntoIterator<Item = i64>) -> Arc<MemoryAuditSource> {
        let source = Arc::new(MemoryAuditSource::new());
        for key in keys {
            source.insert_row(audit_row(key, "users")).await;
        }
        source
    }

    fn coordinator(source: &Arc<MemoryAuditSource>, mode: DeletionMode) -> DeletionCoordinator {
        let source: Arc<dyn AuditSource> = source.clone();
        DeletionCoordinator::new(source, mode)
    }

    fn batch(keys: &[i64]) -> Batch {
        keys.iter()
            .map(|key| {
                let event =
                    ChangeEvent::from_attributes(audit_row(*key, "users"), &EventColumns::default())
                        .unwrap();
                PendingItem::new("audit".to_string(), event)
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn scanned(max_key: Option<i64>, rejected: u64) -> ScanSummary {
        ScanSummary {
            max_key,
            rejected,
            ..ScanSummary::default()
        }
    }

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(DeletionMode::from_flags(false, false), DeletionMode::Disabled);
        assert_eq!(DeletionMode::from_flags(false, true), DeletionMode::Disabled);
        assert_eq!(DeletionMode::from_flags(true, false), DeletionMode::PerBatch);
        assert_eq!(DeletionMode::from_flags(true, true), DeletionMode::AfterHistoric);
    }

    #[tokio::test]
    async fn test_chunked_delete_runs_every_chunk() {
        let source = source_with(1..=3).await;
        let coordinator = coordinator(&source, DeletionMode::PerBatch).with_chunk_size(2);

        coordinator.on_batch_confirmed(&batch(&[1, 2, 3])).await.unwrap();

        assert_eq!(source.delete_calls().await, vec![vec![1, 2], vec![3]]);
        assert!(source.row_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_deletion_disabled_outside_per_batch_mode() {
        let source = source_with(1..=3).await;
        for mode in [DeletionMode::Disabled, DeletionMode::AfterHistoric] {
            coordinator(&source, mode)
                .on_batch_confirmed(&batch(&[1, 2]))
                .await
                .unwrap();
        }
        assert!(source.delete_calls().await.is_empty());
        assert_eq!(source.row_keys().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_range_delete_after_historic() {
        let source = source_with(95..=110).await;
        let coordinator = coordinator(&source, DeletionMode::AfterHistoric);

        let deleted = coordinator
            .on_historic_drained(Some(100), &scanned(Some(110), 0))
            .await
            .unwrap();

        assert_eq!(deleted, 10);
        assert_eq!(source.range_calls().await, vec![(Some(100), 110)]);
        assert_eq!(source.row_keys().await, (95..=100).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_range_delete_without_lower_bound() {
        let source = source_with(1..=5).await;
        let coordinator = coordinator(&source, DeletionMode::AfterHistoric);

        assert_eq!(coordinator
                .on_historic_drained(None, &scanned(Some(4), 0))
                .await
                .unwrap(), 4);
        assert_eq!(source.range_calls().await, vec![(None, 4)]);
        assert_eq!(source.row_keys().await, vec![5]);
    }

    #[tokio::test]
    async fn test_range_delete_skipped_when_nothing_scanned() {
        let source = source_with(1..=5).await;
        let after_historic = coordinator(&source, DeletionMode::AfterHistoric);
        assert_eq!(
            after_historic
                .on_historic_drained(Some(5), &scanned(None, 0))
                .await
                .unwrap(),
            0
        );

        let per_batch = coordinator(&source, DeletionMode::PerBatch);
        assert_eq!(
            per_batch
                .on_historic_drained(None, &scanned(Some(5), 0))
                .await
                .unwrap(),
            0
        );
        assert!(source.range_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_range_delete_skipped_when_rows_were_rejected() {
        let source = source_with(1..=3).await;
        let coordinator = coordinator(&source, DeletionMode::AfterHistoric);

        let deleted = coordinator
            .on_historic_drained(None, &scanned(Some(3), 1))
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert!(source.range_calls().await.is_empty());
        assert_eq!(source.row_keys().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_failure_propagates() {
        let source = source_with(1..=3).await;
        source.fail_next_deletes(1).await;
        let coordinator = coordinator(&source, DeletionMode::PerBatch);

        assert!(coordinator.on_batch_confirmed(&batch(&[1, 2, 3])).await.is_err());
        assert_eq!(source.row_keys().await, vec![1, 2, 3]);
    }
}
