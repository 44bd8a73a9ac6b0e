//! Command-line interface for audit-sync
//!
//! Every flag can also be given as an environment variable, and a `.env`
//! file in the working directory is loaded first.
//!
//! ```bash
//! audit-sync \
//!   --pg-host localhost --pg-database app \
//!   --es-host localhost --es-proto http \
//!   --es-index-prefix audit --es-index-append-table-name \
//!   --queue-limit 1000 --queue-timeout 30s
//! ```

use std::sync::Arc;

use anyhow::Context;
use audit_sync::{
    logging, pipeline_config, shutdown_signal, DestinationOpts, LogOpts, Pipeline, QueueOpts,
    SourceOpts,
};
use clap::Parser;
use document_sink::{DocumentStoreClient, MemoryDocumentStore};
use elasticsearch_sink::elasticsearch_connect;
use postgresql_audit_source::{AuditSource, PostgresAuditSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "audit-sync")]
#[command(about = "Replicate a PostgreSQL audit table into Elasticsearch")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    source: SourceOpts,

    #[command(flatten)]
    destination: DestinationOpts,

    #[command(flatten)]
    queue: QueueOpts,

    #[command(flatten)]
    log: LogOpts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_tracing(&cli.log);

    if let Err(e) = run(cli).await {
        error!(fatal = true, "{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = pipeline_config(&cli.source, &cli.destination, &cli.queue)?;

    let store: Arc<dyn DocumentStoreClient> = if cli.destination.dry_run {
        warn!("Dry run: documents are written to an in-memory store");
        Arc::new(MemoryDocumentStore::new())
    } else {
        let opts = cli.destination.elasticsearch_opts();
        info!(url = %opts.url(), "Connecting to Elasticsearch");
        Arc::new(elasticsearch_connect(&opts).await?)
    };

    let connect = cli.source.connect_opts();
    info!(
        host = %connect.host,
        port = connect.port,
        database = %connect.database,
        "Connecting to PostgreSQL"
    );
    let (source, mut notifications) = PostgresAuditSource::connect(connect, config.table.clone())
        .await
        .context("Failed to connect to the source database")?;
    let source: Arc<dyn AuditSource> = Arc::new(source);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => trigger.cancel(),
            Err(e) => error!("Signal handling unavailable: {e:#}"),
        }
    });

    let pipeline = Pipeline::new(source, store, config);
    let summary = pipeline.run(&mut notifications, shutdown).await?;
    info!(
        watermark = ?summary.watermark,
        historic_rows = summary.historic.rows,
        live_events = summary.live_events,
        indexed_total = pipeline.engine().stats().indexed_total,
        "Stopped"
    );
    Ok(())
}
