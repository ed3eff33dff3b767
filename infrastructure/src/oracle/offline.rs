use async_trait::async_trait;
use pentree_application::ports::decision_oracle::{DecisionOracle, OracleError};
use pentree_domain::OracleRequest;

/// Oracle that is never available.
///
/// Every decision comes from the engine's deterministic fallback, which makes
/// an engagement reproducible without any model endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineOracle;

impl OfflineOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionOracle for OfflineOracle {
    fn name(&self) -> &str {
        "offline"
    }

    async fn decide(&self, _request: &OracleRequest) -> Result<String, OracleError> {
        Err(OracleError::Unavailable("offline mode".into()))
    }
}
