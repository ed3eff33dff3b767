//! Task tree planner
//!
//! The planner owns the [`TaskTree`] and applies decisions to it. It does no
//! I/O: tool execution and oracle calls happen in the application layer,
//! which feeds their results back through [`Planner::apply_outcome`].
//!
//! # Task lifecycle within the planner
//!
//! ```text
//!            select                   ToolInvocation
//! Pending ─────────► (decision) ──────────────────────► InProgress ──► Succeeded/Failed
//!    ▲                    │ Decomposition
//!    │                    ▼
//!    │            children added, parent stays Pending
//!    │                    │ all children resolved
//!    └────────────────────┘ parent selected again for a review round
//! ```
//!
//! A review round may conclude the parent (verdict or tool invocation) or
//! decompose it once more. A second review may not decompose; such a
//! request is turned into a verdict derived from the children.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::DomainError;
use crate::findings::{WorldState, WorldView};
use crate::oracle::{OracleRequest, Subtask, TaskContext, TaskSummary, VerdictStatus};
use crate::task::{
    PriorityContext, PriorityStrategy, Task, TaskId, TaskOutcomeRecord, TaskStatus, TaskTree,
    select_highest,
};
use crate::tool::ToolCapability;

/// Structural budgets for the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningLimits {
    /// Deepest allowed level; the root is level 1
    pub max_depth: usize,
    /// Total number of tasks the tree may hold
    pub max_tasks: usize,
}

impl Default for PlanningLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_tasks: 50,
        }
    }
}

/// Result of a decision, as fed back into the planner.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// A tool invocation ran (including all retries)
    Executed {
        succeeded: bool,
        summary: String,
        records: Vec<u64>,
    },
    Decomposed {
        subtasks: Vec<Subtask>,
        rationale: Option<String>,
    },
    Verdict {
        status: VerdictStatus,
        rationale: String,
    },
}

/// Why a decomposition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    Depth,
    TaskCount,
    ReviewRounds,
}

/// What [`Planner::apply_outcome`] did to the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedOutcome {
    Resolved {
        status: TaskStatus,
    },
    Expanded {
        children: Vec<TaskId>,
        /// Subtasks dropped because the task budget ran out
        truncated: usize,
    },
    /// A decomposition was refused and replaced by a verdict
    Forced {
        status: TaskStatus,
        limit: BudgetLimit,
        reason: String,
    },
}

pub struct Planner {
    tree: TaskTree,
    limits: PlanningLimits,
    strategy: Arc<dyn PriorityStrategy>,
}

impl Planner {
    pub fn new(limits: PlanningLimits, strategy: Arc<dyn PriorityStrategy>) -> Self {
        Self {
            tree: TaskTree::new(),
            limits,
            strategy,
        }
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub fn into_tree(self) -> TaskTree {
        self.tree
    }

    pub fn limits(&self) -> PlanningLimits {
        self.limits
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tree.get(id)
    }

    pub fn create_root_task(&mut self, goal: impl Into<String>) -> Result<TaskId, DomainError> {
        Ok(self.tree.create_root(goal)?)
    }

    /// Root status once the root has resolved.
    pub fn root_status(&self) -> Option<TaskStatus> {
        self.tree
            .root()
            .map(|r| r.status)
            .filter(TaskStatus::is_terminal)
    }

    /// Highest-priority eligible task, or `None` when the frontier is empty
    /// or the root has resolved.
    pub fn select_next_task(&self, world: &WorldState) -> Option<TaskId> {
        if self.root_status().is_some() {
            return None;
        }
        let ctx = PriorityContext {
            tree: &self.tree,
            world,
        };
        select_highest(self.strategy.as_ref(), self.tree.eligible(), &ctx).map(|t| t.id.clone())
    }

    /// Whether a decomposition of `id` would be accepted, and if not, why.
    pub fn decomposition_limit(&self, id: &TaskId) -> Option<BudgetLimit> {
        let task = self.tree.get(id)?;
        if task.depth >= self.limits.max_depth {
            Some(BudgetLimit::Depth)
        } else if self.tree.len() >= self.limits.max_tasks {
            Some(BudgetLimit::TaskCount)
        } else if !task.children.is_empty() && task.reviews > 0 {
            Some(BudgetLimit::ReviewRounds)
        } else {
            None
        }
    }

    pub fn can_decompose(&self, id: &TaskId) -> bool {
        self.tree.get(id).is_some() && self.decomposition_limit(id).is_none()
    }

    /// Marks a task in progress when a tool invocation is dispatched for it.
    pub fn begin_execution(&mut self, id: &TaskId) -> Result<(), DomainError> {
        self.tree.transition(id, TaskStatus::InProgress)?;
        Ok(())
    }

    pub fn apply_outcome(
        &mut self,
        id: &TaskId,
        outcome: TaskOutcome,
    ) -> Result<AppliedOutcome, DomainError> {
        let is_review = self
            .tree
            .get(id)
            .map(|t| !t.children.is_empty())
            .ok_or_else(|| crate::task::TaskTreeError::UnknownTask(id.clone()))?;

        let applied = match outcome {
            TaskOutcome::Executed {
                succeeded,
                summary,
                records,
            } => {
                let record = TaskOutcomeRecord::new(summary).with_records(records);
                let status = self.tree.resolve(id, succeeded, Some(record))?;
                AppliedOutcome::Resolved { status }
            }
            TaskOutcome::Verdict { status, rationale } => {
                let status =
                    self.tree
                        .resolve(id, status.is_success(), Some(TaskOutcomeRecord::new(rationale)))?;
                AppliedOutcome::Resolved { status }
            }
            TaskOutcome::Decomposed {
                subtasks,
                rationale,
            } => self.decompose(id, subtasks, rationale)?,
        };

        if is_review {
            self.tree.record_review(id)?;
        }
        Ok(applied)
    }

    fn decompose(
        &mut self,
        id: &TaskId,
        subtasks: Vec<Subtask>,
        rationale: Option<String>,
    ) -> Result<AppliedOutcome, DomainError> {
        if let Some(limit) = self.decomposition_limit(id) {
            return self.force_verdict(id, limit);
        }

        let subtasks: Vec<Subtask> = subtasks
            .into_iter()
            .filter(|s| !s.goal.trim().is_empty())
            .collect();
        let remaining = self.limits.max_tasks.saturating_sub(self.tree.len());
        let truncated = subtasks.len().saturating_sub(remaining);

        let mut children = Vec::new();
        for subtask in subtasks.into_iter().take(remaining) {
            let child_rationale = subtask.rationale.or_else(|| rationale.clone());
            children.push(
                self.tree
                    .add_child(id, subtask.goal, subtask.priority, child_rationale)?,
            );
        }
        if let Some(rationale) = rationale {
            self.tree
                .merge_outcome(id, TaskOutcomeRecord::new(format!("decomposed: {}", rationale)))?;
        }
        Ok(AppliedOutcome::Expanded {
            children,
            truncated,
        })
    }

    fn force_verdict(
        &mut self,
        id: &TaskId,
        limit: BudgetLimit,
    ) -> Result<AppliedOutcome, DomainError> {
        let (succeeded, detail) = match self.derive_from_children(id) {
            Some((succeeded, detail)) => (succeeded, detail),
            None => (false, "no further decomposition possible".to_string()),
        };
        let reason = match limit {
            BudgetLimit::Depth => format!("depth limit {} reached; {}", self.limits.max_depth, detail),
            BudgetLimit::TaskCount => {
                format!("task budget {} exhausted; {}", self.limits.max_tasks, detail)
            }
            BudgetLimit::ReviewRounds => format!("review rounds exhausted; {}", detail),
        };
        let status = self
            .tree
            .resolve(id, succeeded, Some(TaskOutcomeRecord::new(reason.clone())))?;
        Ok(AppliedOutcome::Forced {
            status,
            limit,
            reason,
        })
    }

    /// Verdict implied by resolved children: succeeded when at least one
    /// child succeeded and none failed. `None` for leaves.
    pub fn derive_from_children(&self, id: &TaskId) -> Option<(bool, String)> {
        let children = self.tree.children(id);
        if children.is_empty() {
            return None;
        }
        let succeeded = children
            .iter()
            .filter(|c| c.status == TaskStatus::Succeeded)
            .count();
        let failed = children
            .iter()
            .filter(|c| c.status == TaskStatus::Failed)
            .count();
        Some((
            succeeded > 0 && failed == 0,
            format!("{}/{} subtasks succeeded", succeeded, children.len()),
        ))
    }

    /// Fails the top-level branch containing `id`: pending tasks in it are
    /// skipped, unresolved ones failed, and the branch root itself failed.
    ///
    /// Returns the branch root.
    pub fn fail_branch(&mut self, id: &TaskId, reason: &str) -> Result<TaskId, DomainError> {
        let branch = self
            .tree
            .branch_root(id)
            .ok_or_else(|| crate::task::TaskTreeError::UnknownTask(id.clone()))?;

        for task_id in self.tree.subtree(&branch).into_iter().rev() {
            if task_id == branch {
                continue;
            }
            match self.tree.status(&task_id)? {
                TaskStatus::Pending => self.tree.transition(&task_id, TaskStatus::Skipped)?,
                TaskStatus::InProgress => {
                    self.tree.resolve(&task_id, false, None)?;
                }
                _ => {}
            }
        }
        if !self.tree.status(&branch)?.is_terminal() {
            self.tree
                .resolve(&branch, false, Some(TaskOutcomeRecord::new(reason)))?;
        }
        Ok(branch)
    }

    /// Assembles what the oracle needs to decide on `id`.
    pub fn oracle_request(
        &self,
        id: &TaskId,
        target: Option<String>,
        world: WorldView,
        catalog: Vec<ToolCapability>,
        attempts: Vec<String>,
    ) -> Result<OracleRequest, DomainError> {
        let task = self
            .tree
            .get(id)
            .ok_or_else(|| crate::task::TaskTreeError::UnknownTask(id.clone()))?;
        let root_goal = self
            .tree
            .root()
            .map(|r| r.goal.clone())
            .unwrap_or_default();

        Ok(OracleRequest {
            engagement_goal: root_goal,
            target,
            task: TaskContext {
                id: task.id.clone(),
                goal: task.goal.clone(),
                depth: task.depth,
                rationale: task.rationale.clone(),
                can_decompose: self.can_decompose(id),
                children: self.tree.children(id).into_iter().map(summarize).collect(),
                attempts,
            },
            ancestors: self.tree.ancestors(id).into_iter().map(summarize).collect(),
            world,
            catalog,
            tree_outline: self.tree.render_outline(),
        })
    }
}

fn summarize(task: &Task) -> TaskSummary {
    TaskSummary {
        id: task.id.clone(),
        goal: task.goal.clone(),
        status: task.status,
        outcome: task.outcome.as_ref().map(|o| o.summary.clone()),
    }
}
