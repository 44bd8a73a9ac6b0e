//! PostgreSQL audit-table change capture.
//!
//! Rows land in an audit table through triggers, and each insert is
//! announced with `NOTIFY`: the full row on the small channel, or only its
//! primary key on the big channel when the row is too large for a
//! notification payload.
//!
//! This crate provides the three source-side stages of the pipeline:
//! - [`HistoricScanner`]: pages the backlog above the watermark through a
//!   server-side cursor
//! - [`LiveCaptureListener`]: turns notifications into change events
//! - [`DeletionCoordinator`]: deletes source rows once they are confirmed
//!   written
//!
//! All three talk to the database through the [`AuditSource`] trait.
//! [`PostgresAuditSource`] is the production implementation and
//! [`testing::MemoryAuditSource`] an in-process one.

mod client;
mod config;
mod convert;
mod deletion;
mod historic;
pub mod hstore;
mod listener;
mod source;
pub mod sql;
pub mod testing;

pub use client::{new_postgresql_client, Notification, PostgresConnectOpts};
pub use config::AuditTableConfig;
pub use deletion::{DeletionCoordinator, DeletionMode, DEFAULT_DELETE_CHUNK_SIZE};
pub use historic::{HistoricScanner, ScanSummary};
pub use listener::LiveCaptureListener;
pub use source::{AuditSource, PostgresAuditSource, PostgresRowCursor, RowCursor};

/// A decoded audit row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;
