//! PostgreSQL client utilities
//!
//! Connections are opened with or without TLS, and the connection task is
//! spawned onto the runtime. When a notification sender is given, `NOTIFY`
//! messages received on the connection are forwarded to it.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Client, Config, Connection, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error};

/// PostgreSQL connection options
#[derive(Clone, Debug)]
pub struct PostgresConnectOpts {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Connect over TLS, verifying the server against the webpki roots
    pub ssl: bool,
}

impl Default for PostgresConnectOpts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "databasename".to_string(),
            username: "root".to_string(),
            password: String::new(),
            ssl: false,
        }
    }
}

impl PostgresConnectOpts {
    fn config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .application_name("audit-sync");
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        config
    }
}

/// A `NOTIFY` received on a listening connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Create a new PostgreSQL client with connection handling.
///
/// With `notifications`, every `NOTIFY` delivered on this connection is
/// forwarded to the sender. The sender is dropped when the connection ends,
/// which closes the receiving side.
pub async fn new_postgresql_client(
    opts: &PostgresConnectOpts,
    notifications: Option<mpsc::UnboundedSender<Notification>>,
) -> Result<Client> {
    let config = opts.config();
    let target = format!("{}:{}/{}", opts.host, opts.port, opts.database);

    if opts.ssl {
        let (client, connection) = config
            .connect(make_tls()?)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {target} over TLS"))?;
        spawn_connection(connection, notifications);
        Ok(client)
    } else {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {target}"))?;
        spawn_connection(connection, notifications);
        Ok(client)
    }
}

fn make_tls() -> Result<MakeRustlsConnect> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to configure TLS protocol versions")?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

fn spawn_connection<S, T>(
    mut connection: Connection<S, T>,
    notifications: Option<mpsc::UnboundedSender<Notification>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(n)) => {
                    debug!(channel = n.channel(), "Received notification");
                    if let Some(tx) = &notifications {
                        let notification = Notification {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                        };
                        if tx.send(notification).is_err() {
                            debug!("Notification receiver dropped");
                        }
                    }
                }
                Ok(AsyncMessage::Notice(notice)) => {
                    debug!("PostgreSQL notice: {}", notice.message());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("PostgreSQL connection error: {e}");
                    break;
                }
            }
        }
        debug!("PostgreSQL connection closed");
    });
}
