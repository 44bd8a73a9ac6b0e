use std::time::Duration;

use document_sink::DocumentStoreClient;

use crate::client::ElasticsearchClient;

/// Elasticsearch connection options
#[derive(Clone, Debug)]
pub struct ElasticsearchOpts {
    pub host: String,
    pub port: u16,
    /// `http` or `https`
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Skip TLS certificate validation
    pub allow_insecure_ssl: bool,
}

impl ElasticsearchOpts {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl Default for ElasticsearchOpts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            protocol: "https".to_string(),
            username: None,
            password: None,
            allow_insecure_ssl: false,
        }
    }
}

/// Default number of connection retry attempts
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
/// Default delay between retry attempts in seconds
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

pub async fn elasticsearch_connect(opts: &ElasticsearchOpts) -> anyhow::Result<ElasticsearchClient> {
    elasticsearch_connect_with_retries(opts, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS).await
}

/// Build a client and ping the cluster, retrying failed pings.
///
/// The cluster may still be starting when the replicator starts, so a ping
/// failure is retried up to `max_retries` times, `retry_delay_secs` apart.
/// A malformed URL or TLS setup fails immediately.
pub async fn elasticsearch_connect_with_retries(
    opts: &ElasticsearchOpts,
    max_retries: u32,
    retry_delay_secs: u64,
) -> anyhow::Result<ElasticsearchClient> {
    let client = ElasticsearchClient::new(opts)?;
    let url = opts.url();

    tracing::debug!("Connecting to Elasticsearch at {}", url);

    let mut last_error = None;
    for attempt in 1..=max_retries.max(1) {
        match client.ping().await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::info!(
                        "Successfully connected to Elasticsearch after {} attempts",
                        attempt
                    );
                }
                return Ok(client);
            }
            Err(e) => {
                if attempt < max_retries {
                    tracing::warn!(
                        "Failed to reach Elasticsearch at '{}' (attempt {}/{}): {:#}. Retrying in {}s...",
                        url,
                        attempt,
                        max_retries,
                        e,
                        retry_delay_secs
                    );
                    tokio::time::sleep(Duration::from_secs(retry_delay_secs)).await;
                }
                last_error = Some(e);
            }
        }
    }

    let reason = last_error
        .map(|e| format!("{e:#}"))
        .unwrap_or_else(|| "no attempt made".to_string());
    Err(anyhow::anyhow!(
        "Failed to connect to Elasticsearch at '{url}' after {max_retries} attempts. Last error: {reason}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_from_parts() {
        let opts = ElasticsearchOpts {
            host: "es.internal".to_string(),
            port: 9243,
            protocol: "http".to_string(),
            ..ElasticsearchOpts::default()
        };
        assert_eq!(opts.url(), "http://es.internal:9243");
        assert_eq!(ElasticsearchOpts::default().url(), "https://localhost:9200");
    }
}
