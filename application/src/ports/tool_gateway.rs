//! Tool gateway port
//!
//! Defines how the engine reaches tool capabilities. The infrastructure
//! provider registry implements it on top of connected tool providers.

use std::time::Duration;

use async_trait::async_trait;
use pentree_domain::{ExecutionOutcome, ProviderId, ProviderState, ToolCapability};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why an invocation produced no usable output.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvocationError {
    /// Provider is dead, unknown or otherwise unreachable; nothing was dispatched
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The provider or the capability reported a failure
    #[error("Tool execution failed: {0}")]
    ToolFailed(String),
}

impl InvocationError {
    pub fn outcome(&self) -> ExecutionOutcome {
        match self {
            InvocationError::ProviderUnavailable(_) => ExecutionOutcome::ProviderUnavailable,
            InvocationError::Timeout(_) => ExecutionOutcome::Timeout,
            InvocationError::ToolFailed(_) => ExecutionOutcome::ToolExecutionError,
        }
    }
}

/// Port for capability discovery and invocation
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Capabilities of providers that can currently serve invocations.
    fn catalog(&self) -> Vec<ToolCapability>;

    /// Lifecycle state of every configured provider.
    fn provider_states(&self) -> Vec<(ProviderId, ProviderState)>;

    fn provider_state(&self, provider: &ProviderId) -> Option<ProviderState> {
        self.provider_states()
            .into_iter()
            .find(|(id, _)| id == provider)
            .map(|(_, state)| state)
    }

    /// Whether at least one provider can still serve invocations.
    fn has_live_provider(&self) -> bool {
        self.provider_states()
            .iter()
            .any(|(_, state)| state.is_live())
    }

    /// Invoke one capability, bounded by `timeout`.
    ///
    /// The implementation enforces `timeout` itself, including any health
    /// check it runs before dispatching, and does its own timeout
    /// bookkeeping. Callers must not race it with a shorter deadline.
    async fn invoke(
        &self,
        provider: &ProviderId,
        capability: &str,
        parameters: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<String, InvocationError>;
}
