//! Batch flush engine.
//!
//! Change events are queued in arrival order and written to the document
//! store in bulk requests. A flush is triggered when the queue reaches the
//! item-count limit or the pending-bytes limit, when the idle timer fires,
//! by the periodic timer, or explicitly. Failed flushes put the whole batch
//! back at the front of the queue so ordering survives retries.
//!
//! Components that act on confirmed writes (source deletion) register a
//! [`FlushObserver`].

mod cache;
mod config;
mod engine;
mod error;
mod observer;
mod queue;
mod stats;

pub use cache::ContainerCache;
pub use config::{DocumentLabel, EngineConfig};
pub use engine::{BatchFlushEngine, EngineState};
pub use error::FlushError;
pub use observer::FlushObserver;
pub use stats::EngineStats;
