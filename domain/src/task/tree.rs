//! The engagement task tree.
//!
//! [`TaskTree`] owns every [`Task`] of one engagement and is the only way to
//! create or mutate them, which keeps the structural rules in one place:
//!
//! - exactly one root, created once
//! - every non-root task has one parent and appears once in its child list
//! - status changes go through [`TaskStatus::can_transition_to`]

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use super::entities::{Task, TaskId, TaskOutcomeRecord, TaskStatus};

/// Errors raised by structural operations on the tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskTreeError {
    #[error("Task tree already has a root")]
    RootExists,

    #[error("Task tree has no root")]
    NoRoot,

    #[error("Task goal must not be empty")]
    EmptyGoal,

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Cannot add children to {task}: task is {status}")]
    ParentNotPending { task: TaskId, status: TaskStatus },

    #[error("Tree structure is inconsistent at {0}")]
    Inconsistent(TaskId),
}

/// Counts over the whole tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub leaves: usize,
    pub max_depth: usize,
}

/// Hierarchical collection of tasks, in creation order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskTree {
    tasks: Vec<Task>,
    #[serde(skip)]
    index: HashMap<TaskId, usize>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_root(&mut self, goal: impl Into<String>) -> Result<TaskId, TaskTreeError> {
        if !self.tasks.is_empty() {
            return Err(TaskTreeError::RootExists);
        }
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(TaskTreeError::EmptyGoal);
        }
        let id = self.next_id();
        let seq = self.next_seq();
        self.insert(Task::new(id.clone(), seq, goal.trim(), 1));
        Ok(id)
    }

    /// Appends a pending child under `parent`.
    ///
    /// The parent must itself still be pending.
    pub fn add_child(
        &mut self,
        parent: &TaskId,
        goal: impl Into<String>,
        priority: Option<u8>,
        rationale: Option<String>,
    ) -> Result<TaskId, TaskTreeError> {
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(TaskTreeError::EmptyGoal);
        }
        let parent_task = self.require(parent)?;
        if parent_task.status != TaskStatus::Pending {
            return Err(TaskTreeError::ParentNotPending {
                task: parent.clone(),
                status: parent_task.status,
            });
        }
        let depth = parent_task.depth + 1;

        let id = self.next_id();
        let seq = self.next_seq();
        let mut task = Task::new(id.clone(), seq, goal.trim(), depth)
            .with_parent(parent.clone())
            .with_rationale(rationale);
        if let Some(priority) = priority {
            task = task.with_priority(priority);
        }
        self.insert(task);
        self.require_mut(parent)?.children.push(id.clone());
        Ok(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn root(&self) -> Option<&Task> {
        self.tasks.first()
    }

    pub fn root_id(&self) -> Option<&TaskId> {
        self.root().map(|t| &t.id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn status(&self, id: &TaskId) -> Result<TaskStatus, TaskTreeError> {
        Ok(self.require(id)?.status)
    }

    /// Moves a task to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, id: &TaskId, next: TaskStatus) -> Result<(), TaskTreeError> {
        let task = self.require_mut(id)?;
        if !task.status.can_transition_to(next) {
            return Err(TaskTreeError::InvalidTransition {
                task: id.clone(),
                from: task.status,
                to: next,
            });
        }
        task.status = next;
        Ok(())
    }

    /// Resolves a task to succeeded or failed, passing through `InProgress`
    /// when the task is still pending.
    pub fn resolve(
        &mut self,
        id: &TaskId,
        succeeded: bool,
        outcome: Option<TaskOutcomeRecord>,
    ) -> Result<TaskStatus, TaskTreeError> {
        if self.status(id)? == TaskStatus::Pending {
            self.transition(id, TaskStatus::InProgress)?;
        }
        let next = if succeeded {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };
        self.transition(id, next)?;
        if let Some(outcome) = outcome {
            self.merge_outcome(id, outcome)?;
        }
        Ok(next)
    }

    /// Attaches outcome information, keeping record links from earlier rounds.
    pub(crate) fn merge_outcome(
        &mut self,
        id: &TaskId,
        outcome: TaskOutcomeRecord,
    ) -> Result<(), TaskTreeError> {
        let task = self.require_mut(id)?;
        match task.outcome.as_mut() {
            Some(existing) => {
                existing.summary = outcome.summary;
                existing.records.extend(outcome.records);
            }
            None => task.outcome = Some(outcome),
        }
        Ok(())
    }

    pub(crate) fn record_review(&mut self, id: &TaskId) -> Result<u8, TaskTreeError> {
        let task = self.require_mut(id)?;
        task.reviews = task.reviews.saturating_add(1);
        Ok(task.reviews)
    }

    /// Ancestors of `id`, root first, excluding `id` itself.
    pub fn ancestors(&self, id: &TaskId) -> Vec<&Task> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|t| t.parent.as_ref());
        while let Some(parent_id) = current {
            match self.get(parent_id) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent.parent.as_ref();
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// The top-level branch `id` belongs to: the root's child on the path
    /// to `id`, or the root itself.
    pub fn branch_root(&self, id: &TaskId) -> Option<TaskId> {
        let task = self.get(id)?;
        if task.is_root() {
            return Some(task.id.clone());
        }
        let ancestors = self.ancestors(id);
        Some(
            ancestors
                .get(1)
                .map(|t| t.id.clone())
                .unwrap_or_else(|| task.id.clone()),
        )
    }

    /// `id` and all of its descendants, pre-order.
    pub fn subtree(&self, id: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(task) = self.get(&current) {
                stack.extend(task.children.iter().rev().cloned());
                out.push(current);
            }
        }
        out
    }

    pub fn children(&self, id: &TaskId) -> Vec<&Task> {
        self.get(id)
            .map(|t| t.children.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    pub fn children_resolved(&self, id: &TaskId) -> bool {
        self.children(id).iter().all(|c| c.status.is_terminal())
    }

    /// Pending tasks that can be selected now: leaves, and parents whose
    /// children have all resolved.
    pub fn eligible(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| t.is_pending() && self.children_resolved(&t.id))
    }

    /// Checks the parent/child invariants over the whole tree.
    pub fn verify(&self) -> Result<(), TaskTreeError> {
        let root = self.root().ok_or(TaskTreeError::NoRoot)?;
        if root.parent.is_some() {
            return Err(TaskTreeError::Inconsistent(root.id.clone()));
        }
        for task in self.tasks.iter().skip(1) {
            let parent_id = task
                .parent
                .as_ref()
                .ok_or_else(|| TaskTreeError::Inconsistent(task.id.clone()))?;
            let parent = self
                .get(parent_id)
                .ok_or_else(|| TaskTreeError::Inconsistent(task.id.clone()))?;
            let occurrences = parent.children.iter().filter(|c| **c == task.id).count();
            if occurrences != 1 || task.depth != parent.depth + 1 {
                return Err(TaskTreeError::Inconsistent(task.id.clone()));
            }
        }
        for task in &self.tasks {
            for child in &task.children {
                let child_task = self
                    .get(child)
                    .ok_or_else(|| TaskTreeError::Inconsistent(task.id.clone()))?;
                if child_task.parent.as_ref() != Some(&task.id) {
                    return Err(TaskTreeError::Inconsistent(child.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Succeeded => stats.succeeded += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
            if task.is_leaf() {
                stats.leaves += 1;
            }
            stats.max_depth = stats.max_depth.max(task.depth);
        }
        stats
    }

    /// Indented plain-text outline of the tree.
    ///
    /// ```text
    /// [ ] t1 enumerate services on 10.0.0.5
    ///   [+] t2 run port scan -- 2 open ports on 10.0.0.5
    /// ```
    pub fn render_outline(&self) -> String {
        let Some(root) = self.root() else {
            return String::new();
        };
        let mut out = String::new();
        for id in self.subtree(&root.id) {
            if let Some(task) = self.get(&id) {
                let indent = "  ".repeat(task.depth.saturating_sub(1));
                out.push_str(&format!(
                    "{}[{}] {} {}",
                    indent,
                    task.status.symbol(),
                    task.id,
                    task.goal
                ));
                if let Some(outcome) = &task.outcome
                    && !outcome.summary.is_empty()
                {
                    out.push_str(" -- ");
                    out.push_str(&outcome.summary);
                }
                out.push('\n');
            }
        }
        out
    }

    fn insert(&mut self, task: Task) {
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
    }

    fn next_seq(&self) -> u64 {
        self.tasks.len() as u64 + 1
    }

    fn next_id(&self) -> TaskId {
        TaskId::from_seq(self.next_seq())
    }

    fn require(&self, id: &TaskId) -> Result<&Task, TaskTreeError> {
        self.get(id)
            .ok_or_else(|| TaskTreeError::UnknownTask(id.clone()))
    }

    fn require_mut(&mut self, id: &TaskId) -> Result<&mut Task, TaskTreeError> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(TaskTreeError::UnknownTask(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_children(n: usize) -> (TaskTree, TaskId, Vec<TaskId>) {
        let mut tree = TaskTree::new();
        let root = tree.create_root("assess 10.0.0.5").unwrap();
        let children = (0..n)
            .map(|i| {
                tree.add_child(&root, format!("child {}", i), None, None)
                    .unwrap()
            })
            .collect();
        (tree, root, children)
    }

    #[test]
    fn test_create_root_once() {
        let mut tree = TaskTree::new();
        let root = tree.create_root("goal").unwrap();
        assert_eq!(root.as_str(), "t1");
        assert_eq!(tree.create_root("again"), Err(TaskTreeError::RootExists));
    }

    #[test]
    fn test_empty_goal_rejected() {
        let mut tree = TaskTree::new();
        assert_eq!(tree.create_root("   "), Err(TaskTreeError::EmptyGoal));
    }

    #[test]
    fn test_children_linked_once() {
        let (tree, root, children) = tree_with_children(3);
        assert_eq!(tree.get(&root).unwrap().children, children);
        for child in &children {
            let task = tree.get(child).unwrap();
            assert_eq!(task.parent.as_ref(), Some(&root));
            assert_eq!(task.depth, 2);
        }
        tree.verify().unwrap();
    }

    #[test]
    fn test_cannot_add_child_to_resolved_parent() {
        let (mut tree, _root, children) = tree_with_children(1);
        tree.resolve(&children[0], true, None).unwrap();
        let err = tree.add_child(&children[0], "late", None, None).unwrap_err();
        assert!(matches!(err, TaskTreeError::ParentNotPending { .. }));
    }

    #[test]
    fn test_resolved_task_never_returns_to_pending() {
        let (mut tree, _root, children) = tree_with_children(1);
        let child = &children[0];
        tree.resolve(child, false, None).unwrap();

        assert!(tree.transition(child, TaskStatus::Pending).is_err());
        assert!(tree.transition(child, TaskStatus::InProgress).is_err());
        assert!(tree.resolve(child, true, None).is_err());
        assert_eq!(tree.status(child).unwrap(), TaskStatus::Failed);
    }

    #[test]
    fn test_eligible_contains_leaves_and_resolved_parents() {
        let (mut tree, root, children) = tree_with_children(2);
        let eligible: Vec<_> = tree.eligible().map(|t| t.id.clone()).collect();
        assert_eq!(eligible, children);

        tree.resolve(&children[0], true, None).unwrap();
        tree.resolve(&children[1], false, None).unwrap();
        let eligible: Vec<_> = tree.eligible().map(|t| t.id.clone()).collect();
        assert_eq!(eligible, vec![root]);
    }

    #[test]
    fn test_branch_root() {
        let (mut tree, root, children) = tree_with_children(1);
        let grandchild = tree.add_child(&children[0], "deeper", None, None).unwrap();
        assert_eq!(tree.branch_root(&grandchild), Some(children[0].clone()));
        assert_eq!(tree.branch_root(&children[0]), Some(children[0].clone()));
        assert_eq!(tree.branch_root(&root), Some(root.clone()));
    }

    #[test]
    fn test_subtree_preorder() {
        let (mut tree, root, children) = tree_with_children(2);
        let grandchild = tree.add_child(&children[0], "deeper", None, None).unwrap();
        assert_eq!(
            tree.subtree(&root),
            vec![root, children[0].clone(), grandchild, children[1].clone()]
        );
    }

    #[test]
    fn test_merge_outcome_keeps_records() {
        let (mut tree, _root, children) = tree_with_children(1);
        let child = &children[0];
        tree.merge_outcome(child, TaskOutcomeRecord::new("first").with_records([1]))
            .unwrap();
        tree.resolve(
            child,
            true,
            Some(TaskOutcomeRecord::new("second").with_records([2])),
        )
        .unwrap();
        let outcome = tree.get(child).unwrap().outcome.clone().unwrap();
        assert_eq!(outcome.summary, "second");
        assert_eq!(outcome.records, vec![1, 2]);
    }

    #[test]
    fn test_statistics_and_outline() {
        let (mut tree, _root, children) = tree_with_children(2);
        tree.resolve(
            &children[0],
            true,
            Some(TaskOutcomeRecord::new("2 open ports")),
        )
        .unwrap();

        let stats = tree.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.leaves, 2);
        assert_eq!(stats.max_depth, 2);

        let outline = tree.render_outline();
        assert!(outline.starts_with("[ ] t1 assess 10.0.0.5"));
        assert!(outline.contains("  [+] t2 child 0 -- 2 open ports"));
    }
}
