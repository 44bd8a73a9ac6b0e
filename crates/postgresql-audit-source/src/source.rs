//! Database access for the audit table.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, info};

use crate::client::{new_postgresql_client, Notification, PostgresConnectOpts};
use crate::config::AuditTableConfig;
use crate::convert::row_to_attributes;
use crate::hstore::decode_hstore_columns;
use crate::sql;
use crate::Row;

/// Forward-only reader over the backlog.
#[async_trait::async_trait]
pub trait RowCursor: Send {
    /// Up to `max_rows` next rows; empty once the backlog is exhausted.
    async fn read(&mut self, max_rows: usize) -> Result<Vec<Row>>;

    /// Release the cursor and its connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Operations the pipeline needs from the audit table.
#[async_trait::async_trait]
pub trait AuditSource: Send + Sync {
    /// Open a cursor over rows with key above `since_exclusive` (all rows
    /// when `None`), ascending by the ordering column.
    async fn open_cursor(&self, since_exclusive: Option<i64>) -> Result<Box<dyn RowCursor>>;

    /// The row with exactly this key.
    async fn fetch_by_key(&self, key: i64) -> Result<Option<Row>>;

    /// Delete rows with these keys in one statement; returns rows affected.
    async fn delete_keys(&self, keys: &[i64]) -> Result<u64>;

    /// Delete rows with key in `(low_exclusive, high_inclusive]`.
    async fn delete_range(&self, low_exclusive: Option<i64>, high_inclusive: i64) -> Result<u64>;

    /// Distinct stream names present in the audit table.
    async fn audited_streams(&self) -> Result<Vec<String>>;

    /// Start listening on `channels`.
    async fn listen(&self, channels: &[&str]) -> Result<()>;

    /// Stop listening on every channel.
    async fn unlisten(&self) -> Result<()>;

    /// Columns carried as hstore text in notification payloads.
    fn hstore_columns(&self) -> &[String];
}

/// PostgreSQL-backed [`AuditSource`].
///
/// One connection serves lookups, deletes and `LISTEN`; each backlog cursor
/// gets a dedicated connection so its transaction does not hold up the rest.
pub struct PostgresAuditSource {
    client: Arc<Client>,
    opts: PostgresConnectOpts,
    config: AuditTableConfig,
    hstore_columns: Vec<String>,
}

impl PostgresAuditSource {
    /// Connect, forwarding notifications to the returned receiver.
    pub async fn connect(
        opts: PostgresConnectOpts,
        config: AuditTableConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = new_postgresql_client(&opts, Some(tx)).await?;

        let hstore_columns: Vec<String> = client
            .query(sql::HSTORE_COLUMNS, &[&config.schema, &config.table])
            .await
            .context("Failed to look up hstore columns of the audit table")?
            .iter()
            .map(|row| row.get::<_, String>(0))
            .collect();
        if hstore_columns.is_empty() {
            info!("No hstore columns in the audit table, hstore processing disabled");
        } else {
            info!(columns = ?hstore_columns, "Hstore processing enabled");
        }

        let source = Self {
            client: Arc::new(client),
            opts,
            config,
            hstore_columns,
        };
        Ok((source, rx))
    }

    pub fn config(&self) -> &AuditTableConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl AuditSource for PostgresAuditSource {
    async fn open_cursor(&self, since_exclusive: Option<i64>) -> Result<Box<dyn RowCursor>> {
        let client = new_postgresql_client(&self.opts, None).await?;
        let declare = sql::declare_cursor(&self.config, since_exclusive);
        debug!("Opening backlog cursor: {declare}");
        client
            .batch_execute(&format!("BEGIN READ ONLY; {declare}"))
            .await
            .context("Failed to open backlog cursor")?;
        Ok(Box::new(PostgresRowCursor { client }))
    }

    async fn fetch_by_key(&self, key: i64) -> Result<Option<Row>> {
        let rows = self
            .client
            .query(&sql::select_by_key(&self.config), &[&key])
            .await
            .with_context(|| format!("Failed to load audit row {key}"))?;
        match rows.first() {
            Some(row) => Ok(Some(row_to_attributes(row)?)),
            None => Ok(None),
        }
    }

    async fn delete_keys(&self, keys: &[i64]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let params: Vec<&(dyn ToSql + Sync)> =
            keys.iter().map(|k| k as &(dyn ToSql + Sync)).collect();
        let deleted = self
            .client
            .execute(&sql::delete_keys(&self.config, keys.len()), &params)
            .await
            .context("Failed to delete audit rows")?;
        Ok(deleted)
    }

    async fn delete_range(&self, low_exclusive: Option<i64>, high_inclusive: i64) -> Result<u64> {
        let statement = sql::delete_range(&self.config, low_exclusive.is_some());
        let deleted = match low_exclusive {
            Some(low) => {
                self.client
                    .execute(&statement, &[&low, &high_inclusive])
                    .await
            }
            None => self.client.execute(&statement, &[&high_inclusive]).await,
        }
        .context("Failed to delete audit row range")?;
        Ok(deleted)
    }

    async fn audited_streams(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(&sql::audited_streams(&self.config), &[])
            .await
            .context("Failed to list audited tables")?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<_, Option<String>>(0))
            .collect())
    }

    async fn listen(&self, channels: &[&str]) -> Result<()> {
        for channel in channels {
            self.client
                .batch_execute(&sql::listen(channel))
                .await
                .with_context(|| format!("LISTEN on '{channel}' failed"))?;
            info!(channel, "LISTEN statement completed");
        }
        Ok(())
    }

    async fn unlisten(&self) -> Result<()> {
        self.client
            .batch_execute(sql::UNLISTEN_ALL)
            .await
            .context("UNLISTEN failed")?;
        Ok(())
    }

    fn hstore_columns(&self) -> &[String] {
        &self.hstore_columns
    }
}

/// Server-side cursor inside a read-only transaction on its own connection.
pub struct PostgresRowCursor {
    client: Client,
}

#[async_trait::async_trait]
impl RowCursor for PostgresRowCursor {
    async fn read(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let rows = self
            .client
            .query(&sql::fetch_cursor(max_rows), &[])
            .await
            .context("Failed to fetch from backlog cursor")?;
        rows.iter().map(row_to_attributes).collect()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute(&format!("{}; COMMIT", sql::close_cursor()))
            .await
            .context("Failed to close backlog cursor")?;
        Ok(())
    }
}

/// Decode a small-channel payload, expanding hstore columns.
pub(crate) fn decode_payload(payload: &str, hstore_columns: &[String]) -> Result<Row> {
    let value: serde_json::Value =
        serde_json::from_str(payload).context("Notification payload is not valid JSON")?;
    let serde_json::Value::Object(mut row) = value else {
        anyhow::bail!("Notification payload is not a JSON object");
    };
    decode_hstore_columns(&mut row, hstore_columns);
    Ok(row)
}
