//! Decision oracle port
//!
//! The oracle (an LLM behind some API) receives an [`OracleRequest`] and
//! answers with free text that should contain exactly one decision. Parsing
//! and fallback handling live in
//! [`OracleAdapter`](crate::use_cases::consult_oracle::OracleAdapter).

use async_trait::async_trait;
use pentree_domain::OracleRequest;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    /// No oracle configured or reachable
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    /// The request was sent but failed
    #[error("Oracle request failed: {0}")]
    RequestFailed(String),

    /// A response arrived without usable content
    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// Port for the external decision-making service
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Name used in logs (e.g. model name)
    fn name(&self) -> &str;

    /// Ask for a decision; returns the raw response text.
    async fn decide(&self, request: &OracleRequest) -> Result<String, OracleError>;
}
