//! Pluggable ordering of eligible tasks.
//!
//! The planner asks a [`PriorityStrategy`] for a score per eligible task and
//! selects the highest. Equal scores fall back to creation order (oldest
//! first), so selection is deterministic for a given tree and world state.
//!
//! | Strategy | Ordering |
//! |----------|----------|
//! | [`SeverityFirst`] (default) | oracle priority, boosted when the task names a host with an unresolved critical finding; recon boosted while nothing is known; deeper tasks slightly penalised |
//! | [`ShallowestFirst`] | breadth-first: lower depth wins, oracle priority breaks ties |

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entities::Task;
use super::tree::TaskTree;
use crate::findings::WorldState;

const RECON_HINTS: &[&str] = &[
    "scan",
    "recon",
    "discover",
    "enumerate",
    "fingerprint",
    "identify",
];

/// Read-only inputs available to a strategy.
#[derive(Clone, Copy)]
pub struct PriorityContext<'a> {
    pub tree: &'a TaskTree,
    pub world: &'a WorldState,
}

/// Scores eligible tasks; higher is selected first.
pub trait PriorityStrategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn score(&self, task: &Task, ctx: &PriorityContext<'_>) -> i64;
}

/// Picks the best task from `candidates`, oldest first on equal score.
pub fn select_highest<'a>(
    strategy: &dyn PriorityStrategy,
    candidates: impl IntoIterator<Item = &'a Task>,
    ctx: &PriorityContext<'_>,
) -> Option<&'a Task> {
    candidates
        .into_iter()
        .map(|task| (strategy.score(task, ctx), task))
        .max_by(|(sa, ta), (sb, tb)| sa.cmp(sb).then_with(|| tb.seq.cmp(&ta.seq)))
        .map(|(_, task)| task)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityFirst;

impl PriorityStrategy for SeverityFirst {
    fn name(&self) -> &'static str {
        "severity_first"
    }

    fn score(&self, task: &Task, ctx: &PriorityContext<'_>) -> i64 {
        let mut score = i64::from(task.priority) * 100;

        let goal = task.goal.to_lowercase();
        let critical_match = ctx.world.unresolved_critical().any(|finding| {
            finding
                .host()
                .is_some_and(|host| goal.contains(&host.to_lowercase()))
        });
        if critical_match {
            score += 500;
        }

        if ctx.world.is_empty() && RECON_HINTS.iter().any(|hint| goal.contains(hint)) {
            score += 50;
        }

        score - (task.depth as i64) * 10
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowestFirst;

impl PriorityStrategy for ShallowestFirst {
    fn name(&self) -> &'static str {
        "shallowest_first"
    }

    fn score(&self, task: &Task, _ctx: &PriorityContext<'_>) -> i64 {
        -(task.depth as i64) * 1000 + i64::from(task.priority)
    }
}

/// Configurable choice of built-in strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityStrategyKind {
    #[default]
    SeverityFirst,
    ShallowestFirst,
}

impl PriorityStrategyKind {
    pub fn build(&self) -> Arc<dyn PriorityStrategy> {
        match self {
            PriorityStrategyKind::SeverityFirst => Arc::new(SeverityFirst),
            PriorityStrategyKind::ShallowestFirst => Arc::new(ShallowestFirst),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityStrategyKind::SeverityFirst => "severity_first",
            PriorityStrategyKind::ShallowestFirst => "shallowest_first",
        }
    }
}

impl FromStr for PriorityStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "severity_first" | "severity" => Ok(PriorityStrategyKind::SeverityFirst),
            "shallowest_first" | "shallowest" | "breadth_first" => {
                Ok(PriorityStrategyKind::ShallowestFirst)
            }
            other => Err(format!("unknown priority strategy '{}'", other)),
        }
    }
}

impl std::fmt::Display for PriorityStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{Finding, FindingKind};
    use crate::task::TaskId;

    fn tree() -> (TaskTree, Vec<TaskId>) {
        let mut tree = TaskTree::new();
        let root = tree.create_root("assess network").unwrap();
        let a = tree
            .add_child(&root, "check web server on 10.0.0.7", Some(5), None)
            .unwrap();
        let b = tree
            .add_child(&root, "exploit 10.0.0.5 smb", Some(5), None)
            .unwrap();
        let c = tree.add_child(&a, "dig deeper", Some(9), None).unwrap();
        (tree, vec![a, b, c])
    }

    fn pick(strategy: &dyn PriorityStrategy, tree: &TaskTree, world: &WorldState) -> TaskId {
        let ctx = PriorityContext { tree, world };
        select_highest(strategy, tree.eligible(), &ctx)
            .unwrap()
            .id
            .clone()
    }

    #[test]
    fn test_severity_first_boosts_critical_hosts() {
        let (tree, ids) = tree();
        let mut world = WorldState::new();
        world
            .merge(
                Finding::new(FindingKind::Vulnerability, TaskId::new("t0"))
                    .with_identity("host", "10.0.0.5")
                    .with_identity("identifier", "MS17-010")
                    .with_attribute("severity", "critical"),
            )
            .unwrap();

        assert_eq!(pick(&SeverityFirst, &tree, &world), ids[1]);
    }

    #[test]
    fn test_severity_first_prefers_oracle_priority() {
        let (tree, ids) = tree();
        let world = WorldState::new();
        assert_eq!(pick(&SeverityFirst, &tree, &world), ids[2]);
    }

    #[test]
    fn test_shallowest_first_ties_break_by_creation_order() {
        let (tree, ids) = tree();
        let world = WorldState::new();
        assert_eq!(pick(&ShallowestFirst, &tree, &world), ids[1]);
    }

    #[test]
    fn test_equal_scores_pick_oldest() {
        let mut tree = TaskTree::new();
        let root = tree.create_root("goal").unwrap();
        let first = tree.add_child(&root, "a", None, None).unwrap();
        tree.add_child(&root, "b", None, None).unwrap();
        let world = WorldState::new();
        assert_eq!(pick(&SeverityFirst, &tree, &world), first);
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!(
            "shallowest-first".parse::<PriorityStrategyKind>().unwrap(),
            PriorityStrategyKind::ShallowestFirst
        );
        assert!("random".parse::<PriorityStrategyKind>().is_err());
        assert_eq!(
            PriorityStrategyKind::default().build().name(),
            "severity_first"
        );
    }
}
