//! Core types for the audit-sync pipeline.
//!
//! This crate provides the record shapes shared by every other crate in the
//! workspace:
//!
//! - [`ChangeEvent`] - One captured audit row, immutable once built
//! - [`PendingItem`] - A change event routed to its destination container
//! - [`Batch`] - An ordered slice of pending items confirmed or written together
//! - [`DeletionJob`] - Source rows to remove after they are confirmed indexed
//! - [`ContainerNaming`] - The pure rule mapping a stream to a container name
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── document-sink            (destination trait, bulk operations)
//!    ├─── batch-flush              (pending queue, flush engine)
//!    ├─── watermark                (resume point lookup)
//!    └─── postgresql-audit-source  (scanner, listener, deletion)
//! ```

pub mod batch;
pub mod event;
pub mod naming;

pub use batch::{Batch, DeletionJob, PendingItem};
pub use event::{key_from_value, parse_timestamp, ChangeEvent, EventColumns, EventError};
pub use naming::{ContainerNaming, NamingError};
