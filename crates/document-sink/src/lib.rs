//! Document store trait abstraction.
//!
//! This crate defines the `DocumentStoreClient` trait that the pipeline
//! writes through. The Elasticsearch implementation lives in
//! `elasticsearch-sink`; [`MemoryDocumentStore`] is an in-process store used
//! for dry runs and tests.
//!
//! The trait speaks in terms of [`BulkOperation`] and [`SearchRequest`] so the
//! flush engine and the watermark resolver never depend on a client's wire
//! format.

mod action;
mod bulk;
mod memory;
mod search;
mod traits;

pub use action::BulkAction;
pub use bulk::{BulkItemResult, BulkOperation, BulkResponse};
pub use memory::MemoryDocumentStore;
pub use search::{SearchHit, SearchRequest, TermFilter};
pub use traits::DocumentStoreClient;
