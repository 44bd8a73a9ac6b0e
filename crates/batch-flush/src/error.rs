/// Why a flush did not complete. The batch is back at the queue front.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("Failed to ensure container '{container}' exists: {source:#}")]
    Container {
        container: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Bulk request failed: {0:#}")]
    Transport(#[source] anyhow::Error),

    #[error("{failed} of {total} bulk items were rejected by the document store")]
    Rejected { failed: usize, total: usize },
}
