//! Findings and the world-state store.
//!
//! A [`Finding`] is a typed fact (host, service, credential, session,
//! vulnerability). [`WorldState`] keeps them unique per kind and identity
//! attributes; [`parse_tool_output`] turns raw tool output into findings.

pub mod entities;
pub mod parser;
pub mod world_state;

pub use entities::{Finding, FindingError, FindingKey, FindingKind};
pub use parser::{ParseContext, ParseError, ParsedOutput, parse_tool_output};
pub use world_state::{
    DEFAULT_VIEW_LIMIT, MergeOutcome, MergeSummary, ViewFilter, WorldState, WorldView,
};
