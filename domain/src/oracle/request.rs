//! Inputs handed to the decision oracle for one task.

use serde::Serialize;

use crate::findings::WorldView;
use crate::task::{TaskId, TaskStatus};
use crate::tool::ToolCapability;

/// A compact view of another task (ancestor or child).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub goal: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// The task being decided on.
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub id: TaskId,
    pub goal: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// False once the depth or task budget is spent
    pub can_decompose: bool,
    /// Resolved children, when the task is being reviewed after its subtasks
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskSummary>,
    /// Summaries of earlier invocation attempts for this task
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<String>,
}

impl TaskContext {
    pub fn is_review(&self) -> bool {
        !self.children.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    /// The engagement's root goal
    pub engagement_goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub task: TaskContext,
    /// Root first
    pub ancestors: Vec<TaskSummary>,
    pub world: WorldView,
    pub catalog: Vec<ToolCapability>,
    /// Outline of the whole tree
    pub tree_outline: String,
}
