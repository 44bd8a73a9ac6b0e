use sync_core::Batch;

/// Notified after a batch is confirmed written.
///
/// Observers run in registration order while the flush lock is held, so two
/// batches are never observed concurrently. Errors are logged by the engine
/// and do not fail the flush.
#[async_trait::async_trait]
pub trait FlushObserver: Send + Sync {
    async fn on_batch_confirmed(&self, batch: &Batch) -> anyhow::Result<()>;
}
