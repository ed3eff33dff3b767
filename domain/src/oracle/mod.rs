//! Decision oracle contract: requests, decisions and prompts.
//!
//! The oracle itself (an LLM endpoint) is an external collaborator reached
//! through the application layer's `DecisionOracle` port. This module only
//! defines what goes in ([`OracleRequest`]) and what may come out
//! ([`Decision`]).

pub mod decision;
pub mod prompt;
pub mod request;

pub use decision::{Decision, DecisionParseError, Subtask, VerdictStatus, parse_decision};
pub use prompt::OraclePromptTemplate;
pub use request::{OracleRequest, TaskContext, TaskSummary};
