use std::time::Duration;

use anyhow::Context;
use batch_flush::{DocumentLabel, EngineConfig};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use document_sink::BulkAction;
use elasticsearch_sink::ElasticsearchOpts;
use postgresql_audit_source::{
    AuditTableConfig, DeletionMode, PostgresConnectOpts, DEFAULT_DELETE_CHUNK_SIZE,
};
use sync_core::ContainerNaming;

use super::duration::parse_duration;

/// Source database and audit table
#[derive(Parser, Clone, Debug)]
pub struct SourceOpts {
    #[arg(long, default_value = "localhost", env = "PG_HOST")]
    pub pg_host: String,

    #[arg(long, default_value_t = 5432, env = "PG_PORT")]
    pub pg_port: u16,

    #[arg(long, default_value = "databasename", env = "PG_DATABASE")]
    pub pg_database: String,

    #[arg(long, default_value = "root", env = "PG_USERNAME")]
    pub pg_username: String,

    #[arg(long, default_value = "", env = "PG_PASSWORD", hide_env_values = true)]
    pub pg_password: String,

    /// Connect over TLS
    #[arg(long, env = "PG_SSL", value_parser = BoolishValueParser::new())]
    pub pg_ssl: bool,

    #[arg(long, default_value = "audit", env = "PG_SCHEMA")]
    pub pg_schema: String,

    #[arg(long, default_value = "logged_actions", env = "PG_TABLE")]
    pub pg_table: String,

    /// Channel carrying full audit rows
    #[arg(long, default_value = "audit", env = "PG_LISTEN_TO")]
    pub pg_listen_to: String,

    /// Channel carrying only primary keys (default: `<small channel>_id`)
    #[arg(long, env = "PG_LISTEN_TO_ID")]
    pub pg_listen_to_id: Option<String>,

    /// Primary key column, also the document id
    #[arg(long, default_value = "event_id", env = "PG_UID_COLUMN")]
    pub pg_uid_column: String,

    #[arg(long, default_value = "action_timestamp", env = "PG_TIMESTAMP_COLUMN")]
    pub pg_timestamp_column: String,

    /// Column the backlog is ordered by
    #[arg(long, default_value = "event_id", env = "PG_ORDER_BY_COLUMN")]
    pub pg_order_by_column: String,

    /// Column naming the audited table of each row
    #[arg(long, default_value = "table_name", env = "PG_STREAM_COLUMN")]
    pub pg_stream_column: String,

    /// Delete audit rows once they are indexed
    #[arg(long, env = "PG_DELETE_ON_INDEX", value_parser = BoolishValueParser::new())]
    pub pg_delete_on_index: bool,

    /// Delete the drained backlog as one range instead of per batch
    #[arg(long, env = "PG_DELETE_AFTER_HISTORIC", value_parser = BoolishValueParser::new())]
    pub pg_delete_after_historic: bool,

    /// Keys per DELETE statement
    #[arg(long, default_value_t = DEFAULT_DELETE_CHUNK_SIZE, env = "PG_DELETE_CHUNK_SIZE")]
    pub pg_delete_chunk_size: usize,
}

impl SourceOpts {
    pub fn connect_opts(&self) -> PostgresConnectOpts {
        PostgresConnectOpts {
            host: self.pg_host.clone(),
            port: self.pg_port,
            database: self.pg_database.clone(),
            username: self.pg_username.clone(),
            password: self.pg_password.clone(),
            ssl: self.pg_ssl,
        }
    }

    pub fn table_config(&self) -> AuditTableConfig {
        AuditTableConfig {
            schema: self.pg_schema.clone(),
            table: self.pg_table.clone(),
            key_column: self.pg_uid_column.clone(),
            timestamp_column: self.pg_timestamp_column.clone(),
            ordering_column: self.pg_order_by_column.clone(),
            stream_column: self.pg_stream_column.clone(),
            small_channel: self.pg_listen_to.clone(),
            big_channel: self
                .pg_listen_to_id
                .clone()
                .unwrap_or_else(|| format!("{}_id", self.pg_listen_to)),
        }
    }

    pub fn deletion_mode(&self) -> DeletionMode {
        DeletionMode::from_flags(self.pg_delete_on_index, self.pg_delete_after_historic)
    }
}

/// Destination document store
#[derive(Parser, Clone, Debug)]
pub struct DestinationOpts {
    #[arg(long, default_value = "localhost", env = "ES_HOST")]
    pub es_host: String,

    #[arg(long, default_value_t = 9200, env = "ES_PORT")]
    pub es_port: u16,

    #[arg(long, default_value = "https", env = "ES_PROTO")]
    pub es_proto: String,

    #[arg(long, env = "ES_USERNAME")]
    pub es_username: Option<String>,

    #[arg(long, env = "ES_PASSWORD", hide_env_values = true)]
    pub es_password: Option<String>,

    /// Skip certificate validation
    #[arg(long, env = "ES_ALLOW_INSECURE_SSL", value_parser = BoolishValueParser::new())]
    pub es_allow_insecure_ssl: bool,

    #[arg(long, default_value = "audit", env = "ES_INDEX_PREFIX")]
    pub es_index_prefix: String,

    /// Append the audited table name to index names
    #[arg(long, env = "ES_INDEX_APPEND_TABLE_NAME", value_parser = BoolishValueParser::new())]
    pub es_index_append_table_name: bool,

    /// strftime format of a date suffix on index names, e.g. `%Y.%m`
    #[arg(long, env = "ES_INDEX_DATE_SUFFIX_FORMAT")]
    pub es_index_date_suffix_format: Option<String>,

    /// JSON mapping applied to created indices
    #[arg(long, env = "ES_MAPPING")]
    pub es_mapping: Option<String>,

    /// Attribute name of the label stamped on every document
    #[arg(long, env = "ES_LABEL_NAME")]
    pub es_label_name: Option<String>,

    /// Label value; also restricts the resume point lookup
    #[arg(long, env = "ES_LABEL")]
    pub es_label: Option<String>,

    /// Create the indices of every audited table before live capture
    #[arg(long, env = "ES_PRE_CREATE_INDICIES", value_parser = BoolishValueParser::new())]
    pub es_pre_create_indicies: bool,

    /// `index` or `create`
    #[arg(long, default_value = "index", env = "ES_BULK_ACTION")]
    pub es_bulk_action: BulkAction,

    /// Maximum size of one bulk request in bytes
    #[arg(long, env = "ES_MAX_POST_BYTES")]
    pub es_max_post_bytes: Option<usize>,

    /// Write to an in-memory store instead of Elasticsearch
    #[arg(long, env = "DRY_RUN", value_parser = BoolishValueParser::new())]
    pub dry_run: bool,
}

impl DestinationOpts {
    pub fn elasticsearch_opts(&self) -> ElasticsearchOpts {
        ElasticsearchOpts {
            host: self.es_host.clone(),
            port: self.es_port,
            protocol: self.es_proto.clone(),
            username: self.es_username.clone(),
            password: self.es_password.clone(),
            allow_insecure_ssl: self.es_allow_insecure_ssl,
        }
    }

    pub fn naming(&self) -> anyhow::Result<ContainerNaming> {
        let date_format = self
            .es_index_date_suffix_format
            .clone()
            .filter(|f| !f.is_empty());
        Ok(ContainerNaming::new(
            self.es_index_prefix.clone(),
            self.es_index_append_table_name,
            date_format,
        )?)
    }

    pub fn mapping(&self) -> anyhow::Result<Option<serde_json::Value>> {
        self.es_mapping
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .map(|m| serde_json::from_str(m).context("ES_MAPPING is not valid JSON"))
            .transpose()
    }

    /// The label, when both its name and value are set.
    pub fn label(&self) -> Option<DocumentLabel> {
        match (&self.es_label_name, &self.es_label) {
            (Some(name), Some(value)) if !name.is_empty() => Some(DocumentLabel {
                name: name.clone(),
                value: value.clone(),
            }),
            _ => None,
        }
    }
}

/// Batching and flush timing
#[derive(Parser, Clone, Debug)]
pub struct QueueOpts {
    /// Items per bulk batch; a full batch is flushed immediately
    #[arg(long, default_value_t = 500, env = "QUEUE_LIMIT")]
    pub queue_limit: usize,

    /// Pending bytes that trigger a flush
    #[arg(long, env = "QUEUE_MAX_BYTES")]
    pub queue_max_bytes: Option<usize>,

    /// Flush interval: "120", "30s", "2m", "1h"
    #[arg(long, default_value = "120", env = "QUEUE_TIMEOUT", value_parser = parse_duration)]
    pub queue_timeout: Duration,

    /// Interval of the status log line
    #[arg(long, default_value = "60m", env = "STATUS_INTERVAL", value_parser = parse_duration)]
    pub status_interval: Duration,
}

impl QueueOpts {
    pub fn engine_config(&self, destination: &DestinationOpts) -> anyhow::Result<EngineConfig> {
        if self.queue_limit == 0 {
            anyhow::bail!("QUEUE_LIMIT must be greater than zero");
        }
        Ok(EngineConfig {
            max_items: self.queue_limit,
            max_pending_bytes: self.queue_max_bytes,
            max_post_bytes: destination.es_max_post_bytes,
            flush_interval: self.queue_timeout,
            bulk_action: destination.es_bulk_action,
            naming: destination.naming()?,
            label: destination.label(),
            mapping: destination.mapping()?,
        })
    }
}

/// Log verbosity
#[derive(Parser, Clone, Debug)]
pub struct LogOpts {
    /// Log at debug level
    #[arg(long, env = "DEBUG", value_parser = BoolishValueParser::new())]
    pub debug: bool,

    /// Log at info level; warnings only when off
    #[arg(
        long,
        env = "INFO",
        action = ArgAction::Set,
        default_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub info: bool,

    /// Prefix log lines with a timestamp
    #[arg(long, env = "LOG_TIMESTAMP", value_parser = BoolishValueParser::new())]
    pub log_timestamp: bool,
}

impl LogOpts {
    /// Filter directive used when `RUST_LOG` is not set.
    pub fn level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.info {
            "info"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        destination: DestinationOpts,
        #[command(flatten)]
        queue: QueueOpts,
        #[command(flatten)]
        log: LogOpts,
    }

    fn parse(args: &[&str]) -> TestCli {
        let mut argv = vec!["audit-sync"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv)
    }

    #[test]
    fn test_big_channel_follows_small_channel() {
        let cli = parse(&["--pg-listen-to", "changes"]);
        let table = cli.source.table_config();
        assert_eq!(table.small_channel, "changes");
        assert_eq!(table.big_channel, "changes_id");

        let cli = parse(&["--pg-listen-to", "changes", "--pg-listen-to-id", "big"]);
        assert_eq!(cli.source.table_config().big_channel, "big");
    }

    #[test]
    fn test_engine_config_from_flags() {
        let cli = parse(&[
            "--queue-limit",
            "25",
            "--queue-timeout",
            "30s",
            "--es-index-prefix",
            "Audit",
            "--es-index-append-table-name",
            "--es-bulk-action",
            "create",
            "--es-label-name",
            "origin",
            "--es-label",
            "east",
            "--es-mapping",
            r#"{"properties": {}}"#,
        ]);
        let config = cli.queue.engine_config(&cli.destination).unwrap();

        assert_eq!(config.max_items, 25);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.bulk_action, BulkAction::Create);
        assert_eq!(config.naming.search_pattern(), "audit*");
        assert_eq!(
            config.label,
            Some(DocumentLabel {
                name: "origin".to_string(),
                value: "east".to_string()
            })
        );
        assert!(config.mapping.is_some());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let cli = parse(&["--es-mapping", "{nope"]);
        assert!(cli.queue.engine_config(&cli.destination).is_err());

        let cli = parse(&["--es-index-date-suffix-format", "%Q"]);
        assert!(cli.queue.engine_config(&cli.destination).is_err());

        let cli = parse(&["--queue-limit", "0"]);
        assert!(cli.queue.engine_config(&cli.destination).is_err());
    }

    #[test]
    fn test_label_needs_name_and_value() {
        let cli = parse(&["--es-label", "east"]);
        assert_eq!(cli.destination.label(), None);
    }

    #[test]
    fn test_deletion_mode() {
        assert_eq!(parse(&[]).source.deletion_mode(), DeletionMode::Disabled);
        assert_eq!(
            parse(&["--pg-delete-on-index"]).source.deletion_mode(),
            DeletionMode::PerBatch
        );
        assert_eq!(
            parse(&["--pg-delete-on-index", "--pg-delete-after-historic"])
                .source
                .deletion_mode(),
            DeletionMode::AfterHistoric
        );
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&[]).log.level(), "info");
        assert_eq!(parse(&["--debug"]).log.level(), "debug");
        assert_eq!(parse(&["--info", "0"]).log.level(), "warn");
    }
}
