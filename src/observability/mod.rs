//! Observability: structured logging for maintenance and recovery paths.

mod logger;

pub use logger::{Logger, Severity};
