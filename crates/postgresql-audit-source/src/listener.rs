//! Live capture from `LISTEN`/`NOTIFY`.

use std::sync::Arc;

use anyhow::{bail, Result};
use batch_flush::BatchFlushEngine;
use sync_core::{ChangeEvent, EventColumns};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::Notification;
use crate::config::AuditTableConfig;
use crate::source::{decode_payload, AuditSource};

/// Turns notifications on the small and big channels into change events.
pub struct LiveCaptureListener {
    source: Arc<dyn AuditSource>,
    engine: BatchFlushEngine,
    config: AuditTableConfig,
    columns: EventColumns,
}

impl LiveCaptureListener {
    pub fn new(
        source: Arc<dyn AuditSource>,
        engine: BatchFlushEngine,
        config: AuditTableConfig,
    ) -> Self {
        let columns = config.event_columns();
        Self {
            source,
            engine,
            config,
            columns,
        }
    }

    /// `LISTEN` on both channels. Notifications arriving from here on are
    /// buffered until [`run`](Self::run) consumes them.
    pub async fn subscribe(&self) -> Result<()> {
        self.source
            .listen(&[&self.config.small_channel, &self.config.big_channel])
            .await
    }

    /// Consume notifications until cancelled.
    ///
    /// On cancellation every channel is unsubscribed and the number of
    /// enqueued events is returned. If the notification stream ends the
    /// source connection is gone, which is an error.
    pub async fn run(
        &self,
        notifications: &mut mpsc::UnboundedReceiver<Notification>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut enqueued = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(enqueued, "Stopping live capture");
                    if let Err(e) = self.source.unlisten().await {
                        warn!("UNLISTEN failed: {e:#}");
                    }
                    return Ok(enqueued);
                }
                message = notifications.recv() => match message {
                    Some(notification) => match self.handle(notification).await {
                        Ok(true) => enqueued += 1,
                        Ok(false) => {}
                        Err(e) => {
                            error!(fatal = true, "Live capture failed: {e:#}");
                            if let Err(e) = self.source.unlisten().await {
                                warn!("UNLISTEN failed: {e:#}");
                            }
                            return Err(e);
                        }
                    },
                    None => {
                        error!(fatal = true, "Notification stream ended, source connection lost");
                        bail!("Source connection lost: notification stream ended");
                    }
                },
            }
        }
    }

    /// Enqueue the event a notification announces. Returns whether an event
    /// was enqueued. Bad payloads and missing rows are logged and dropped;
    /// a failed row lookup is returned as an error.
    pub async fn handle(&self, notification: Notification) -> Result<bool> {
        let Notification { channel, payload } = notification;
        let row = if channel == self.config.small_channel {
            match decode_payload(&payload, self.source.hstore_columns()) {
                Ok(row) => row,
                Err(e) => {
                    error!(channel = %channel, payload = %payload, "Dropping notification: {e:#}");
                    return Ok(false);
                }
            }
        } else if channel == self.config.big_channel {
            let Ok(key) = payload.trim().parse::<i64>() else {
                error!(channel = %channel, payload = %payload, "Dropping notification: payload is not a key");
                return Ok(false);
            };
            match self.source.fetch_by_key(key).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    error!(key, "Unable to load row from database, dropping notification");
                    return Ok(false);
                }
                Err(e) => return Err(e.context(format!("Unable to load row {key} from database"))),
            }
        } else {
            debug!(channel = %channel, "Ignoring notification on unknown channel");
            return Ok(false);
        };

        match ChangeEvent::from_attributes(row, &self.columns) {
            Ok(event) => {
                debug!(
                    stream = event.stream_name(),
                    key = event.primary_key(),
                    channel = %channel,
                    "Captured change"
                );
                self.engine.enqueue(event);
                Ok(true)
            }
            Err(e) => {
                error!(channel = %channel, "Dropping notification: {e}");
                Ok(false)
            }
        }
    }
}
