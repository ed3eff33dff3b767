//! Task tree: the hierarchical plan driving an engagement.
//!
//! - [`entities`] — [`Task`], [`TaskId`], [`TaskStatus`]
//! - [`tree`] — [`TaskTree`] and its structural invariants
//! - [`priority`] — pluggable [`PriorityStrategy`] implementations

pub mod entities;
pub mod priority;
pub mod tree;

pub use entities::{DEFAULT_PRIORITY, MAX_PRIORITY, Task, TaskId, TaskOutcomeRecord, TaskStatus};
pub use priority::{
    PriorityContext, PriorityStrategy, PriorityStrategyKind, SeverityFirst, ShallowestFirst,
    select_highest,
};
pub use tree::{TaskTree, TaskTreeError, TreeStatistics};
