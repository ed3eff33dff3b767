//! Application layer for pentree
//!
//! This crate contains use cases, port definitions, and application configuration.
//! It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::{EngineConfig, RetryPolicy};
pub use ports::{
    decision_oracle::{DecisionOracle, OracleError},
    engagement_progress::{EngagementProgress, NoEngagementProgress},
    execution_log::{ExecutionLogSink, NoExecutionLog},
    tool_gateway::{InvocationError, ToolGateway},
};
pub use use_cases::consult_oracle::{
    DecisionSource, OracleAdapter, OracleOutcome, OracleUnavailable, fallback_decision,
};
pub use use_cases::execute_action::{ExecutionCoordinator, ExecutionReport, Invocation};
pub use use_cases::run_engagement::{
    EngagementError, EngagementReport, FatalError, RunEngagementInput, RunEngagementUseCase,
    TerminalStatus,
};
pub use use_cases::shared::{SharedWorldState, StoreCorruption};
