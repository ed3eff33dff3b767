//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod decision_oracle;
pub mod engagement_progress;
pub mod execution_log;
pub mod tool_gateway;
