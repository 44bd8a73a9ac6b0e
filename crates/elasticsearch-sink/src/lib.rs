//! Elasticsearch implementation of [`document_sink::DocumentStoreClient`].

mod client;
mod connect;
mod error;
mod wire;

pub use client::ElasticsearchClient;
pub use connect::{elasticsearch_connect, elasticsearch_connect_with_retries, ElasticsearchOpts};
pub use error::ElasticsearchError;
