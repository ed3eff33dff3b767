//! Execution records and the append-only execution log.

pub mod log;
pub mod record;

pub use log::ExecutionLog;
pub use record::{ExecutionOutcome, ExecutionRecord, RecordDraft};
