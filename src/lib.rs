//! audit-sync
//!
//! Replicates a PostgreSQL audit table, filled by triggers, into
//! Elasticsearch. Rows are written in append order with the primary key as
//! the document id, so replaying a row overwrites the same document.
//!
//! # Lifecycle
//!
//! 1. The resume point (highest key already indexed) is read back from the
//!    destination.
//! 2. The listener subscribes to the notification channels; anything raised
//!    from here on is buffered.
//! 3. The backlog above the resume point is scanned and flushed, and
//!    optionally deleted from the audit table as one key range.
//! 4. Buffered and new notifications feed the same flush engine until a
//!    shutdown signal, after which the queue is drained.
//!
//! # CLI Usage
//!
//! ```bash
//! PG_HOST=db ES_HOST=search ES_INDEX_APPEND_TABLE_NAME=1 audit-sync
//!
//! # Write nothing, log what would be indexed
//! audit-sync --dry-run --debug
//! ```

pub mod config;
pub mod logging;
pub mod orchestrator;

pub use config::{DestinationOpts, LogOpts, QueueOpts, SourceOpts};
pub use orchestrator::{shutdown_signal, Pipeline, PipelineConfig, RunSummary};

/// Build the pipeline configuration from parsed options.
pub fn pipeline_config(
    source: &SourceOpts,
    destination: &DestinationOpts,
    queue: &QueueOpts,
) -> anyhow::Result<PipelineConfig> {
    Ok(PipelineConfig {
        engine: queue.engine_config(destination)?,
        table: source.table_config(),
        deletion: source.deletion_mode(),
        delete_chunk_size: source.pg_delete_chunk_size.max(1),
        pre_create_containers: destination.es_pre_create_indicies,
        status_interval: queue.status_interval,
    })
}
