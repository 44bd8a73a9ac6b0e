//! Resume point lookup for audit-sync
//!
//! Nothing is persisted by the pipeline itself: the resume point is read
//! back from the destination at startup. The most recent document (by the
//! timestamp attribute) across every container the naming rule can produce
//! carries the highest key already indexed, and the backlog scan continues
//! strictly above it.
//!
//! When a document label is configured, only documents carrying that label
//! are considered, so several pipelines can share one index prefix.

mod resolver;

pub use resolver::WatermarkResolver;
