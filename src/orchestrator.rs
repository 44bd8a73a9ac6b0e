//! Pipeline startup, steady state and shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use batch_flush::{BatchFlushEngine, EngineConfig};
use document_sink::DocumentStoreClient;
use postgresql_audit_source::{
    AuditSource, AuditTableConfig, DeletionCoordinator, DeletionMode, HistoricScanner,
    LiveCaptureListener, Notification, ScanSummary, DEFAULT_DELETE_CHUNK_SIZE,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use watermark::WatermarkResolver;

/// Everything the pipeline needs besides its two collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    pub table: AuditTableConfig,
    pub deletion: DeletionMode,
    pub delete_chunk_size: usize,
    /// Ensure the current container of every audited table before live
    /// capture starts
    pub pre_create_containers: bool,
    pub status_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            table: AuditTableConfig::default(),
            deletion: DeletionMode::Disabled,
            delete_chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
            pre_create_containers: false,
            status_interval: Duration::from_secs(3600),
        }
    }
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Key the backlog scan resumed after
    pub watermark: Option<i64>,
    pub historic: ScanSummary,
    /// Rows removed by the range delete after the backlog drained
    pub historic_deleted: u64,
    /// Events enqueued from notifications
    pub live_events: u64,
}

/// Audit table to document store replication.
pub struct Pipeline {
    source: Arc<dyn AuditSource>,
    engine: BatchFlushEngine,
    deletion: Arc<DeletionCoordinator>,
    resolver: WatermarkResolver,
    scanner: HistoricScanner,
    listener: LiveCaptureListener,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn AuditSource>,
        store: Arc<dyn DocumentStoreClient>,
        config: PipelineConfig,
    ) -> Self {
        let engine = BatchFlushEngine::new(store.clone(), config.engine.clone());
        let columns = config.table.event_columns();

        let deletion = Arc::new(
            DeletionCoordinator::new(source.clone(), config.deletion)
                .with_chunk_size(config.delete_chunk_size),
        );
        engine.register_observer(deletion.clone());

        Self {
            resolver: WatermarkResolver::new(store, engine.clone(), columns.clone()),
            scanner: HistoricScanner::new(source.clone(), engine.clone(), columns),
            listener: LiveCaptureListener::new(
                source.clone(),
                engine.clone(),
                config.table.clone(),
            ),
            source,
            engine,
            deletion,
            config,
        }
    }

    pub fn engine(&self) -> &BatchFlushEngine {
        &self.engine
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Startup failures (watermark lookup, subscription, backlog scan) are
    /// returned as errors, as is a failed final flush or the loss of the
    /// notification stream. Queued items are flushed before returning in
    /// every case where the destination is still reachable.
    pub async fn run(
        &self,
        notifications: &mut mpsc::UnboundedReceiver<Notification>,
        shutdown: CancellationToken,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let streams = self
            .source
            .audited_streams()
            .await
            .context("Failed to list audited tables")?;
        info!(streams = ?streams, "Found audited tables");

        summary.watermark = self
            .resolver
            .resolve(&streams)
            .await
            .context("Failed to resolve the resume point")?;

        // Notifications raised while the backlog drains are buffered
        self.listener.subscribe().await?;

        summary.historic = self
            .scanner
            .scan(summary.watermark, &shutdown)
            .await
            .context("Historic processing failed")?;
        self.engine
            .drain()
            .await
            .context("Failed to flush historic rows")?;

        summary.historic_deleted = match self
            .deletion
            .on_historic_drained(summary.watermark, &summary.historic)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                error!("Failed to delete historic rows: {e:#}");
                0
            }
        };

        if shutdown.is_cancelled() {
            if let Err(e) = self.source.unlisten().await {
                warn!("UNLISTEN failed: {e:#}");
            }
            return self.shutdown(summary, None).await;
        }

        if self.config.pre_create_containers {
            self.pre_create_containers(&streams).await;
        }

        self.engine
            .begin_periodic_flush(self.config.engine.flush_interval);
        let status = self.spawn_status_updates(shutdown.child_token());

        info!("Listening for new audit rows");
        let live = self.listener.run(notifications, &shutdown).await;
        status.abort();

        match live {
            Ok(events) => {
                summary.live_events = events;
                self.shutdown(summary, None).await
            }
            Err(e) => self.shutdown(summary, Some(e)).await,
        }
    }

    async fn pre_create_containers(&self, streams: &[String]) {
        let mut containers: Vec<String> = streams
            .iter()
            .map(|stream| self.engine.container_for(stream))
            .collect();
        containers.dedup();
        for container in containers {
            if let Err(e) = self.engine.ensure_container_exists(&container).await {
                warn!(container = %container, "Failed to pre-create container: {e:#}");
            }
        }
    }

    fn spawn_status_updates(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let interval = self.config.status_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => engine.log_status(),
                }
            }
        })
    }

    async fn shutdown(
        &self,
        summary: RunSummary,
        failure: Option<anyhow::Error>,
    ) -> Result<RunSummary> {
        info!(pending = self.engine.pending_len(), "Shutting down, flushing queued items");
        self.engine.stop().await;
        let drained = self.engine.drain().await;
        self.engine.log_status();

        if let Some(e) = failure {
            if let Err(flush) = drained {
                error!("Final flush failed: {flush}");
            }
            return Err(e);
        }
        drained.context("Final flush failed")?;
        info!("Shutdown complete");
        Ok(summary)
    }
}

/// Resolves once SIGINT or SIGTERM is received.
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Received shutdown signal");
    Ok(())
}
