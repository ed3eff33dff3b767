//! `[engine]` and `[execution]` sections

use pentree_application::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Planner budgets and oracle failure handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileEngineConfig {
    /// Deepest tree level (root is 1)
    pub max_depth: usize,
    /// Total number of tasks the tree may hold
    pub max_tasks: usize,
    /// Select/decide/apply rounds before the run stops
    pub max_iterations: usize,
    /// `severity_first` or `shallowest_first`
    pub priority: String,
    pub max_consecutive_oracle_failures: usize,
    /// Findings shown to the oracle per decision
    pub view_limit: usize,
    /// Default engagement target (overridden by `--target`)
    pub target: Option<String>,
}

impl Default for FileEngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_tasks: 50,
            max_iterations: 50,
            priority: "severity_first".to_string(),
            max_consecutive_oracle_failures: 3,
            view_limit: 50,
            target: None,
        }
    }
}

/// Invocation timeout and per-class retry budgets
///
/// ```toml
/// [execution]
/// invocation_timeout_secs = 300
///
/// [execution.retries]
/// reconnaissance = 3
/// exploitation = 0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileExecutionConfig {
    pub invocation_timeout_secs: u64,
    pub retries: RetryPolicy,
}

impl Default for FileExecutionConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_secs: 120,
            retries: RetryPolicy::default(),
        }
    }
}
