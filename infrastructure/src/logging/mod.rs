//! Logging infrastructure — the persistent execution audit trail.
//!
//! Provides [`JsonlExecutionLog`], a JSONL file writer that implements
//! the [`ExecutionLogSink`](pentree_application::ExecutionLogSink) port.

mod execution_log;

pub use execution_log::{JsonlExecutionLog, LogReadError};
