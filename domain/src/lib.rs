//! Domain layer for pentree
//!
//! This crate contains the core entities and rules of an engagement. It has
//! no dependencies on infrastructure or presentation concerns and performs
//! no I/O.
//!
//! # Core Concepts
//!
//! ## Task Tree
//!
//! An engagement starts from one goal (the root task) and grows a tree of
//! sub-tasks as the decision oracle decomposes it. The [`Planner`] selects
//! the next task with a pluggable [`PriorityStrategy`] and applies outcomes.
//!
//! ## World State
//!
//! Everything learned from tool output is a [`Finding`], kept unique per
//! kind and identity attributes in the [`WorldState`].
//!
//! ## Capabilities
//!
//! External tool providers expose [`ToolCapability`]s. Every invocation
//! attempt leaves an immutable [`ExecutionRecord`].

pub mod core;
pub mod execution;
pub mod findings;
pub mod oracle;
pub mod planning;
pub mod task;
pub mod tool;

// Re-export commonly used types
pub use core::error::DomainError;
pub use execution::{ExecutionLog, ExecutionOutcome, ExecutionRecord, RecordDraft};
pub use findings::{
    Finding, FindingError, FindingKey, FindingKind, MergeOutcome, MergeSummary, ParseContext,
    ParseError, ParsedOutput, ViewFilter, WorldState, WorldView, parse_tool_output,
};
pub use oracle::{
    Decision, DecisionParseError, OraclePromptTemplate, OracleRequest, Subtask, TaskContext,
    TaskSummary, VerdictStatus, parse_decision,
};
pub use planning::{AppliedOutcome, BudgetLimit, Planner, PlanningLimits, TaskOutcome};
pub use task::{
    PriorityStrategy, PriorityStrategyKind, SeverityFirst, ShallowestFirst, Task, TaskId,
    TaskOutcomeRecord, TaskStatus, TaskTree, TaskTreeError, TreeStatistics,
};
pub use tool::{
    CapabilityClass, ParameterKind, ParameterSchema, ParameterSpec, ParameterValidator,
    ProviderError, ProviderId, ProviderState, SchemaValidator, ToolCapability, ToolProvider,
    TransportDescriptor, ValidationError, validate_parameters,
};
