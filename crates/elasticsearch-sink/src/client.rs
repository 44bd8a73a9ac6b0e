use anyhow::Result;
use document_sink::{BulkOperation, BulkResponse, DocumentStoreClient, SearchHit, SearchRequest};
use elasticsearch::{
    auth::Credentials,
    cert::CertificateValidation,
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    BulkParts, Elasticsearch, SearchParts,
};
use serde_json::Value;
use url::Url;

use crate::connect::ElasticsearchOpts;
use crate::error::ElasticsearchError;
use crate::wire::{bulk_body, parse_bulk_response, parse_search_hits, search_body};

/// Elasticsearch-backed document store.
#[derive(Clone)]
pub struct ElasticsearchClient {
    client: Elasticsearch,
}

impl ElasticsearchClient {
    /// Build a client. No request is sent until the first call.
    pub fn new(opts: &ElasticsearchOpts) -> Result<Self, ElasticsearchError> {
        let url = Url::parse(&opts.url())?;
        let pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(pool);
        if let Some(username) = &opts.username {
            builder = builder.auth(Credentials::Basic(
                username.clone(),
                opts.password.clone().unwrap_or_default(),
            ));
        }
        if opts.allow_insecure_ssl {
            builder = builder.cert_validation(CertificateValidation::None);
        }
        let transport = builder.build()?;
        Ok(Self {
            client: Elasticsearch::new(transport),
        })
    }

    async fn json_or_status(
        operation: &'static str,
        response: Response,
    ) -> Result<Value, ElasticsearchError> {
        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ElasticsearchError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait::async_trait]
impl DocumentStoreClient for ElasticsearchClient {
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .ping()
            .send()
            .await
            .map_err(ElasticsearchError::from)?;
        let status = response.status_code();
        if !status.is_success() {
            return Err(ElasticsearchError::Status {
                operation: "ping",
                status: status.as_u16(),
                body: String::new(),
            }
            .into());
        }
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(ElasticsearchError::from)?;
        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(ElasticsearchError::Status {
                operation: "index exists",
                status,
                body: response.text().await.unwrap_or_default(),
            }
            .into()),
        }
    }

    async fn create_index(&self, index: &str, mapping: Option<&Value>) -> Result<()> {
        let indices = self.client.indices();
        let request = indices.create(IndicesCreateParts::Index(index));
        let response = match mapping {
            Some(mapping) => request.body(mapping.clone()).send().await,
            None => request.send().await,
        }
        .map_err(ElasticsearchError::from)?;
        Self::json_or_status("create index", response).await?;
        tracing::info!(index, "Created index");
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }
        let response = self
            .client
            .bulk(BulkParts::None)
            .body(bulk_body(operations))
            .send()
            .await
            .map_err(ElasticsearchError::from)?;
        let body = Self::json_or_status("bulk", response).await?;
        Ok(parse_bulk_response(&body)?)
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .search(SearchParts::Index(&[request.index_pattern.as_str()]))
            .allow_no_indices(true)
            .ignore_unavailable(true)
            .body(search_body(request))
            .send()
            .await
            .map_err(ElasticsearchError::from)?;
        let body = Self::json_or_status("search", response).await?;
        Ok(parse_search_hits(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unreachable_client() -> ElasticsearchClient {
        ElasticsearchClient::new(&ElasticsearchOpts {
            host: "127.0.0.1".to_string(),
            port: 1,
            protocol: "http".to_string(),
            ..ElasticsearchOpts::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_index_reports_transport_errors() {
        let client = unreachable_client();
        let mapping = json!({"mappings": {"properties": {"event_id": {"type": "long"}}}});

        assert!(client.create_index("audit", Some(&mapping)).await.is_err());
        assert!(client.create_index("audit", None).await.is_err());
    }
}
