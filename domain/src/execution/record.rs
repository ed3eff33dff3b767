//! Execution records: the audit trail of every capability invocation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::TaskId;
use crate::tool::ProviderId;

/// Outcome of one invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    /// Parameters rejected before dispatch
    ValidationError,
    /// Provider dead or unknown; nothing dispatched
    ProviderUnavailable,
    /// Invocation exceeded its timeout and was abandoned
    Timeout,
    /// Provider or capability reported failure, or the output was malformed
    ToolExecutionError,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    /// Whether the call reached the provider at all.
    pub fn was_dispatched(&self) -> bool {
        !matches!(
            self,
            ExecutionOutcome::ValidationError | ExecutionOutcome::ProviderUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Succeeded => "succeeded",
            ExecutionOutcome::ValidationError => "validation_error",
            ExecutionOutcome::ProviderUnavailable => "provider_unavailable",
            ExecutionOutcome::Timeout => "timeout",
            ExecutionOutcome::ToolExecutionError => "tool_execution_error",
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, sequenced record of one invocation attempt.
///
/// Serialized as one JSON object per line in the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub seq: u64,
    pub task_id: TaskId,
    pub provider_id: ProviderId,
    pub capability: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: ExecutionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub findings_committed: usize,
}

/// A record before it has been sequenced by an [`ExecutionLog`](super::ExecutionLog).
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub task_id: TaskId,
    pub provider_id: ProviderId,
    pub capability: String,
    pub parameters: Map<String, Value>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: ExecutionOutcome,
    pub raw_result: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub findings_committed: usize,
}

impl RecordDraft {
    pub fn new(
        task_id: TaskId,
        provider_id: ProviderId,
        capability: impl Into<String>,
        parameters: Map<String, Value>,
        attempt: u32,
    ) -> Self {
        Self {
            task_id,
            provider_id,
            capability: capability.into(),
            parameters,
            attempt,
            timestamp: Utc::now(),
            duration_ms: 0,
            outcome: ExecutionOutcome::Succeeded,
            raw_result: None,
            summary: None,
            error: None,
            findings_committed: 0,
        }
    }

    pub fn succeeded(
        mut self,
        raw: impl Into<String>,
        summary: impl Into<String>,
        findings_committed: usize,
    ) -> Self {
        self.outcome = ExecutionOutcome::Succeeded;
        self.raw_result = Some(raw.into());
        self.summary = Some(summary.into());
        self.findings_committed = findings_committed;
        self
    }

    pub fn failed(mut self, outcome: ExecutionOutcome, error: impl Into<String>) -> Self {
        self.outcome = outcome;
        self.error = Some(error.into());
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_result = Some(raw.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub(crate) fn into_record(self, seq: u64) -> ExecutionRecord {
        ExecutionRecord {
            seq,
            task_id: self.task_id,
            provider_id: self.provider_id,
            capability: self.capability,
            parameters: self.parameters,
            attempt: self.attempt,
            timestamp: self.timestamp,
            duration_ms: self.duration_ms,
            outcome: self.outcome,
            raw_result: self.raw_result,
            summary: self.summary,
            error: self.error,
            findings_committed: self.findings_committed,
        }
    }
}
