//! Planning: selection and outcome application over the task tree.

pub mod planner;

pub use planner::{AppliedOutcome, BudgetLimit, Planner, PlanningLimits, TaskOutcome};
