//! Append-only, in-memory execution log.

use serde::{Serialize, Serializer};

use super::record::{ExecutionRecord, RecordDraft};
use crate::task::TaskId;
use crate::tool::ProviderId;

/// Sequenced records of one engagement.
///
/// Records can only be appended; nothing hands out mutable access.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    records: Vec<ExecutionRecord>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a draft, assigning the next sequence number (starting at 1).
    pub fn append(&mut self, draft: RecordDraft) -> &ExecutionRecord {
        let seq = self.records.last().map(|r| r.seq + 1).unwrap_or(1);
        self.records.push(draft.into_record(seq));
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_task<'a>(&'a self, task: &'a TaskId) -> impl Iterator<Item = &'a ExecutionRecord> {
        self.records.iter().filter(move |r| &r.task_id == task)
    }

    /// Whether `capability` of `provider` has been dispatched in this run.
    pub fn was_invoked(&self, provider: &ProviderId, capability: &str) -> bool {
        self.records.iter().any(|r| {
            &r.provider_id == provider && r.capability == capability && r.outcome.was_dispatched()
        })
    }
}

impl Serialize for ExecutionLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.records)
    }
}
