//! Input, output and error types for the RunEngagement use case.

use chrono::{DateTime, Utc};
use pentree_domain::{DomainError, ExecutionLog, TaskTree, TreeStatistics, WorldState};
use serde::Serialize;
use thiserror::Error;

/// Errors that abort an engagement before it reaches a terminal status.
///
/// Provider and oracle failures never end up here; they are absorbed by the
/// task or branch they affect.
#[derive(Error, Debug)]
pub enum EngagementError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Input for the RunEngagement use case
#[derive(Debug, Clone)]
pub struct RunEngagementInput {
    pub goal: String,
    /// Host, range or URL under assessment
    pub target: Option<String>,
}

impl RunEngagementInput {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Conditions that end the engagement loop with no way to continue.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FatalError {
    #[error("No tool provider is reachable")]
    NoProvidersReachable,

    #[error("World state corrupted: {0}")]
    StoreCorruption(String),
}

/// How an engagement ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminalStatus {
    /// The root task succeeded
    GoalAchieved,
    /// The root task failed
    GoalFailed,
    /// No eligible task was left before the root resolved
    Exhausted,
    /// The iteration budget ran out
    BudgetExhausted,
    Cancelled,
    Fatal(FatalError),
}

impl TerminalStatus {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TerminalStatus::Fatal(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::GoalAchieved => "goal_achieved",
            TerminalStatus::GoalFailed => "goal_failed",
            TerminalStatus::Exhausted => "exhausted",
            TerminalStatus::BudgetExhausted => "budget_exhausted",
            TerminalStatus::Cancelled => "cancelled",
            TerminalStatus::Fatal(_) => "fatal",
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalStatus::Fatal(e) => write!(f, "fatal: {}", e),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Final state of an engagement; serializes to the exported snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngagementReport {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub status: TerminalStatus,
    pub statistics: TreeStatistics,
    pub tree: TaskTree,
    pub findings: WorldState,
    pub records: ExecutionLog,
    /// Decision rounds run
    pub iterations: usize,
    /// Decisions that came from the fallback policy
    pub fallbacks: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EngagementReport {
    pub fn is_success(&self) -> bool {
        self.status == TerminalStatus::GoalAchieved
    }
}
