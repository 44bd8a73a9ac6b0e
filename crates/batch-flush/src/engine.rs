//! The batch flush engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use document_sink::{BulkOperation, DocumentStoreClient};
use parking_lot::{Mutex, RwLock};
use sync_core::{Batch, ChangeEvent, PendingItem};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::ContainerCache;
use crate::config::EngineConfig;
use crate::error::FlushError;
use crate::observer::FlushObserver;
use crate::queue::{split_by_post_bytes, PendingQueue, QueuedDocument};
use crate::stats::{AtomicEngineStats, EngineStats};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// A flush is writing a batch
    Flushing,
    /// `drain()` is flushing until the queue is empty
    Draining,
}

struct Inner {
    store: Arc<dyn DocumentStoreClient>,
    config: EngineConfig,
    queue: Mutex<PendingQueue>,
    flush_lock: tokio::sync::Mutex<()>,
    state: Mutex<EngineState>,
    containers: ContainerCache,
    observers: RwLock<Vec<Arc<dyn FlushObserver>>>,
    flush_scheduled: AtomicBool,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    periodic_timer: Mutex<Option<JoinHandle<()>>>,
    stats: AtomicEngineStats,
}

/// Queues change events and writes them to the document store in batches.
///
/// Cheap to clone; clones share the same queue. `enqueue` may be called
/// from any task. At most one flush runs at a time, and items leave the
/// queue in the order they were enqueued.
#[derive(Clone)]
pub struct BatchFlushEngine {
    inner: Arc<Inner>,
}

impl BatchFlushEngine {
    pub fn new(store: Arc<dyn DocumentStoreClient>, mut config: EngineConfig) -> Self {
        config.max_items = config.max_items.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                queue: Mutex::new(PendingQueue::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(EngineState::Idle),
                containers: ContainerCache::new(),
                observers: RwLock::new(Vec::new()),
                flush_scheduled: AtomicBool::new(false),
                idle_timer: Mutex::new(None),
                periodic_timer: Mutex::new(None),
                stats: AtomicEngineStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    pub fn register_observer(&self, observer: Arc<dyn FlushObserver>) {
        self.inner.observers.write().push(observer);
    }

    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Primary keys waiting to be flushed, front first.
    pub fn pending_keys(&self) -> Vec<i64> {
        self.inner.queue.lock().keys()
    }

    pub fn stats(&self) -> EngineStats {
        let (items, bytes) = {
            let queue = self.inner.queue.lock();
            (queue.len(), queue.bytes())
        };
        self.inner.stats.snapshot(items, bytes)
    }

    pub fn log_status(&self) {
        let stats = self.stats();
        info!(
            indexed_total = stats.indexed_total,
            pending_items = stats.pending_items,
            pending_bytes = stats.pending_bytes,
            flushes = stats.flushes,
            failed_flushes = stats.failed_flushes,
            "Status update"
        );
    }

    /// Container the event is routed to at this moment.
    pub fn container_for(&self, stream: &str) -> String {
        self.inner.config.naming.container_for(stream, Utc::now())
    }

    /// Queue one event.
    ///
    /// Schedules a flush when the queue holds a full batch, otherwise makes
    /// sure the idle timer is running. Must be called inside a tokio runtime.
    pub fn enqueue(&self, event: ChangeEvent) {
        let config = &self.inner.config;
        let container = self.container_for(event.stream_name());
        let label = config
            .label
            .as_ref()
            .map(|l| (l.name.as_str(), l.value.as_str()));
        let operation = BulkOperation::new(
            config.bulk_action,
            container.clone(),
            event.primary_key(),
            event.to_document(label).to_string(),
        );
        debug!(
            stream = event.stream_name(),
            key = event.primary_key(),
            container = %container,
            "Queued change event"
        );
        let item = PendingItem::new(container, event);

        let (items, bytes) = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(item, QueuedDocument::new(operation));
            abort_if_misaligned(&queue);
            (queue.len(), queue.bytes())
        };

        if config.batch_ready(items, bytes) {
            self.schedule_flush();
        } else {
            self.start_idle_timer();
        }
    }

    fn has_full_batch(&self) -> bool {
        let queue = self.inner.queue.lock();
        self.inner.config.batch_ready(queue.len(), queue.bytes())
    }

    /// Spawn a flush task unless one is already scheduled. The task keeps
    /// flushing while full batches remain.
    fn schedule_flush(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            let mut failed = false;
            loop {
                if let Err(e) = engine.flush().await {
                    warn!(error = %e, "Size-triggered flush failed, items remain queued");
                    failed = true;
                    break;
                }
                if !engine.has_full_batch() {
                    break;
                }
            }
            engine.inner.flush_scheduled.store(false, Ordering::Release);
            if failed {
                engine.start_idle_timer();
            } else if engine.has_full_batch() {
                // Filled up between the last check and clearing the flag
                engine.schedule_flush();
            }
        });
    }

    fn start_idle_timer(&self) {
        let mut slot = self.inner.idle_timer.lock();
        if slot.as_ref().is_some_and(|timer| !timer.is_finished()) {
            return;
        }
        let engine = self.clone();
        let delay = self.inner.config.flush_interval;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.inner.idle_timer.lock().take();
            if let Err(e) = engine.flush().await {
                warn!(error = %e, "Timed flush failed, items remain queued");
            }
            if engine.pending_len() > 0 {
                engine.start_idle_timer();
            }
        }));
    }

    /// Flush on a fixed interval until [`stop`](Self::stop) is called.
    pub fn begin_periodic_flush(&self, interval: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = BatchFlushEngine { inner };
                if let Err(e) = engine.flush().await {
                    warn!(error = %e, "Periodic flush failed, items remain queued");
                }
            }
        });
        if let Some(previous) = self.inner.periodic_timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the periodic and idle timers. Queued items are kept.
    ///
    /// Waits for an in-flight flush first, so a timer is never cancelled
    /// while it holds a batch taken off the queue.
    pub async fn stop(&self) {
        let _flushing = self.inner.flush_lock.lock().await;
        let timers = [
            self.inner.periodic_timer.lock().take(),
            self.inner.idle_timer.lock().take(),
        ];
        for timer in timers.into_iter().flatten() {
            timer.abort();
            // Cancellation lands at the timer's next await, which is outside the flush
            let _ = timer.await;
        }
    }

    /// Make sure `container` exists, creating it with the configured mapping
    /// if needed. Concurrent calls for the same name share one attempt, and
    /// a name is only checked once per process after it succeeds.
    pub async fn ensure_container_exists(&self, container: &str) -> anyhow::Result<()> {
        let store = &self.inner.store;
        let mapping = self.inner.config.mapping.as_ref();
        self.inner
            .containers
            .get_or_create(container, || async move {
                if store
                    .index_exists(container)
                    .await
                    .with_context(|| format!("Failed to check whether '{container}' exists"))?
                {
                    debug!(container, "Container already exists");
                    return Ok(());
                }
                info!(container, "Creating container");
                store
                    .create_index(container, mapping)
                    .await
                    .with_context(|| format!("Failed to create container '{container}'"))
            })
            .await
    }

    /// Write up to one batch from the front of the queue.
    ///
    /// Returns the number of items written; `0` when the queue was empty. On
    /// failure the whole batch is put back at the front of the queue and no
    /// observer is notified.
    pub async fn flush(&self) -> Result<usize, FlushError> {
        let _flush_guard = self.inner.flush_lock.lock().await;

        let (items, documents) = {
            let mut queue = self.inner.queue.lock();
            if queue.is_empty() {
                return Ok(0);
            }
            let taken = queue.take_front(self.inner.config.max_items);
            abort_if_misaligned(&queue);
            taken
        };
        if items.len() != documents.len() {
            error!(
                fatal = true,
                items = items.len(),
                documents = documents.len(),
                "Flushed batch has mismatched metadata and documents"
            );
            std::process::exit(1);
        }

        self.set_state_if(EngineState::Idle, EngineState::Flushing);
        let batch = Batch::new(items);
        let result = self.write_batch(&batch, &documents).await;
        self.set_state_if(EngineState::Flushing, EngineState::Idle);

        match result {
            Ok(()) => {
                let count = batch.len();
                self.inner.stats.record_flush(count as u64);
                info!(
                    items = count,
                    containers = batch.containers().len(),
                    "Flushed batch"
                );
                self.notify_observers(&batch).await;
                Ok(count)
            }
            Err(e) => {
                self.inner.stats.record_failure();
                for item in batch.iter() {
                    debug!(
                        stream = item.event.stream_name(),
                        key = item.document_id,
                        "Re-queued after failed flush"
                    );
                }
                warn!(items = batch.len(), error = %e, "Flush failed, batch re-queued");
                {
                    let mut queue = self.inner.queue.lock();
                    queue.restore_front(batch.into_items(), documents);
                    abort_if_misaligned(&queue);
                }
                Err(e)
            }
        }
    }

    async fn write_batch(
        &self,
        batch: &Batch,
        documents: &[QueuedDocument],
    ) -> Result<(), FlushError> {
        for container in batch.containers() {
            self.ensure_container_exists(&container)
                .await
                .map_err(|source| FlushError::Container { container, source })?;
        }

        let max_post_bytes = self.inner.config.max_post_bytes;
        let lengths: Vec<usize> = documents.iter().map(|d| d.encoded_len).collect();
        let ranges = split_by_post_bytes(&lengths, max_post_bytes);
        let sub_batches = ranges.len();

        for range in ranges {
            let chunk = &documents[range];
            if let (Some(limit), [single]) = (max_post_bytes, chunk) {
                if single.encoded_len > limit {
                    warn!(
                        container = %single.operation.index,
                        key = %single.operation.id,
                        size = single.encoded_len,
                        limit,
                        "Document exceeds the maximum request size, sending it alone"
                    );
                }
            }
            let operations: Vec<BulkOperation> =
                chunk.iter().map(|d| d.operation.clone()).collect();
            let response = self
                .inner
                .store
                .bulk(&operations)
                .await
                .map_err(FlushError::Transport)?;

            let failures = response.failures(self.inner.config.bulk_action);
            if !failures.is_empty() {
                for failure in &failures {
                    error!(
                        container = %failure.index,
                        key = %failure.id,
                        status = failure.status,
                        error = failure.error.as_deref().unwrap_or(""),
                        "Document rejected by the document store"
                    );
                }
                return Err(FlushError::Rejected {
                    failed: failures.len(),
                    total: operations.len(),
                });
            }
            let conflicts = response.items.iter().filter(|i| i.is_conflict()).count();
            if conflicts > 0 {
                debug!(conflicts, "Documents already present, counted as indexed");
            }
        }
        if sub_batches > 1 {
            debug!(sub_batches, items = batch.len(), "Batch split by request size");
        }
        Ok(())
    }

    async fn notify_observers(&self, batch: &Batch) {
        let observers: Vec<Arc<dyn FlushObserver>> = self.inner.observers.read().clone();
        for observer in observers {
            if let Err(e) = observer.on_batch_confirmed(batch).await {
                error!(items = batch.len(), error = %e, "Flush observer failed");
            }
        }
    }

    /// Flush until the queue is empty and no flush is in flight. Stops at,
    /// and returns, the first failure.
    pub async fn drain(&self) -> Result<(), FlushError> {
        *self.inner.state.lock() = EngineState::Draining;
        // An empty flush still waits on the flush lock, so a batch held by a
        // concurrent flush is either written or back in the queue by then.
        let result = loop {
            match self.flush().await {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        };
        *self.inner.state.lock() = EngineState::Idle;
        result
    }

    fn set_state_if(&self, from: EngineState, to: EngineState) {
        let mut state = self.inner.state.lock();
        if *state == from {
            *state = to;
        }
    }
}

fn abort_if_misaligned(queue: &PendingQueue) {
    if let Err((items, documents)) = queue.check_aligned() {
        error!(
            fatal = true,
            items, documents, "Pending metadata and document queues are out of sync"
        );
        std::process::exit(1);
    }
}
