//! Engagement progress port.
//!
//! [`EngagementProgress`] is an **output port** the binary implements to
//! show what the engine is doing. All methods default to no-ops, so
//! implementers only override the callbacks they care about.

use pentree_domain::{
    Decision, ExecutionRecord, MergeSummary, ProviderId, Task, TaskId,
};

use crate::use_cases::consult_oracle::DecisionSource;
use crate::use_cases::run_engagement::TerminalStatus;

pub trait EngagementProgress: Send + Sync {
    fn on_engagement_start(&self, _goal: &str) {}

    /// A task was selected for the next decision round
    fn on_task_selected(&self, _task: &Task) {}

    /// A decision was obtained, from the oracle or from the fallback policy
    fn on_decision(&self, _task: &Task, _decision: &Decision, _source: &DecisionSource) {}

    fn on_invocation_start(&self, _provider: &ProviderId, _capability: &str, _attempt: u32) {}

    fn on_invocation_complete(&self, _record: &ExecutionRecord) {}

    fn on_retry(&self, _capability: &str, _attempt: u32, _max_attempts: u32, _reason: &str) {}

    fn on_findings_committed(&self, _summary: &MergeSummary) {}

    /// A task reached a terminal status
    fn on_task_resolved(&self, _task: &Task) {}

    fn on_branch_failed(&self, _branch: &TaskId, _reason: &str) {}

    fn on_engagement_complete(&self, _status: &TerminalStatus) {}
}

/// No-op progress notifier.
pub struct NoEngagementProgress;

impl EngagementProgress for NoEngagementProgress {}
