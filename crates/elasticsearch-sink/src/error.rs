use elasticsearch::http::transport::BuildError;

#[derive(Debug, thiserror::Error)]
pub enum ElasticsearchError {
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] BuildError),

    #[error("transport error: {0}")]
    Transport(#[from] elasticsearch::Error),

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("unexpected response to {operation}: {reason}")]
    Response {
        operation: &'static str,
        reason: String,
    },
}
