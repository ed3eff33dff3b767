//! Port for the persistent execution log.
//!
//! Every [`ExecutionRecord`] is handed to an [`ExecutionLogSink`] right
//! after it is appended to the in-memory log. This is separate from
//! `tracing`-based diagnostics: tracing carries human-readable messages,
//! the sink carries the audit trail in a machine-readable format (JSONL).

use pentree_domain::ExecutionRecord;

/// Port for persisting execution records.
///
/// `record` is synchronous and non-fallible so that audit logging never
/// disrupts an engagement; implementations report their own failures.
pub trait ExecutionLogSink: Send + Sync {
    fn record(&self, record: &ExecutionRecord);
}

/// No-op implementation for tests and when logging is disabled.
pub struct NoExecutionLog;

impl ExecutionLogSink for NoExecutionLog {
    fn record(&self, _record: &ExecutionRecord) {}
}
