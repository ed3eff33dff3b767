//! Task entities: identifiers, status lifecycle and the task node itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default oracle-influenced priority for a task (scale 0-10).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Upper bound of the priority scale.
pub const MAX_PRIORITY: u8 = 10;

/// Identifier of a task within one engagement tree (`t1`, `t2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub(crate) fn from_seq(seq: u64) -> Self {
        Self(format!("t{}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: Into<String>> From<T> for TaskId {
    fn from(s: T) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task.
///
/// ```text
/// Pending ──► InProgress ──► Succeeded
///    │                  └──► Failed
///    └──► Skipped
/// ```
///
/// No state ever returns to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Skipped)
                | (TaskStatus::InProgress, TaskStatus::Succeeded)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    /// Single-character marker used in tree outlines.
    pub fn symbol(&self) -> char {
        match self {
            TaskStatus::Pending => ' ',
            TaskStatus::InProgress => '~',
            TaskStatus::Succeeded => '+',
            TaskStatus::Failed => 'x',
            TaskStatus::Skipped => '-',
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a resolved (or partially worked) task produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcomeRecord {
    /// Short human-readable summary
    pub summary: String,
    /// Sequence numbers of the execution records produced for this task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<u64>,
}

impl TaskOutcomeRecord {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            records: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item = u64>) -> Self {
        self.records.extend(records);
        self
    }
}

/// A node of the engagement task tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// What this task is meant to achieve
    pub goal: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskId>,
    /// Children in creation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskId>,
    /// Root is depth 1
    pub depth: usize,
    /// Creation order within the tree, used for tie-breaks
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Oracle-influenced priority, 0 (lowest) to 10 (highest)
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcomeRecord>,
    /// Number of decision rounds spent on this task after its children resolved
    #[serde(default)]
    pub reviews: u8,
}

impl Task {
    pub(crate) fn new(id: TaskId, seq: u64, goal: impl Into<String>, depth: usize) -> Self {
        Self {
            id,
            goal: goal.into(),
            status: TaskStatus::Pending,
            parent: None,
            children: Vec::new(),
            depth,
            seq,
            created_at: Utc::now(),
            rationale: None,
            priority: DEFAULT_PRIORITY,
            outcome: None,
            reviews: 0,
        }
    }

    pub(crate) fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub(crate) fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub(crate) fn with_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// A task with children that is asked to decide again once they resolved.
    pub fn is_review(&self) -> bool {
        !self.children.is_empty() && self.status == TaskStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_transitions_never_return_to_pending() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Skipped,
        ];
        for from in all {
            assert!(!from.can_transition_to(TaskStatus::Pending), "{from} -> pending");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Skipped] {
            for to in [TaskStatus::InProgress, TaskStatus::Succeeded, TaskStatus::Failed] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_only_pending_can_be_skipped() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Skipped));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Skipped));
    }

    #[test]
    fn test_task_id_display_and_serde() {
        let id = TaskId::from_seq(7);
        assert_eq!(id.to_string(), "t7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t7\"");
    }

    #[test]
    fn test_priority_is_clamped() {
        let task = Task::new(TaskId::from_seq(1), 1, "goal", 1).with_priority(42);
        assert_eq!(task.priority, MAX_PRIORITY);
    }
}
