//! Command-line and environment configuration.

pub mod duration;
mod opts;

pub use duration::{parse_duration, parse_duration_to_secs};
pub use opts::{DestinationOpts, LogOpts, QueueOpts, SourceOpts};
