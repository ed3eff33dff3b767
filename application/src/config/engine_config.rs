//! Engine configuration — budgets, timeouts and retry policy.
//!
//! [`EngineConfig`] is built once (from config files and CLI flags) and
//! passed to [`RunEngagementUseCase`](crate::use_cases::run_engagement::RunEngagementUseCase)
//! at construction. Nothing reads run configuration from globals.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use pentree_domain::{CapabilityClass, PlanningLimits, PriorityStrategyKind};

/// Extra attempts allowed after a failed invocation, per capability class.
///
/// Retries happen on timeouts and provider-reported tool failures only.
///
/// | Class | Default |
/// |-------|---------|
/// | reconnaissance | 2 |
/// | enumeration | 1 |
/// | general | 1 |
/// | credential_attack | 0 |
/// | exploitation | 0 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub reconnaissance: u32,
    pub enumeration: u32,
    pub credential_attack: u32,
    pub exploitation: u32,
    pub general: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reconnaissance: 2,
            enumeration: 1,
            credential_attack: 0,
            exploitation: 0,
            general: 1,
        }
    }
}

impl RetryPolicy {
    /// No retries for any class.
    pub fn none() -> Self {
        Self {
            reconnaissance: 0,
            enumeration: 0,
            credential_attack: 0,
            exploitation: 0,
            general: 0,
        }
    }

    pub fn retries_for(&self, class: CapabilityClass) -> u32 {
        match class {
            CapabilityClass::Reconnaissance => self.reconnaissance,
            CapabilityClass::Enumeration => self.enumeration,
            CapabilityClass::CredentialAttack => self.credential_attack,
            CapabilityClass::Exploitation => self.exploitation,
            CapabilityClass::General => self.general,
        }
    }
}

/// Engine configuration passed in at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Depth and task-count budgets of the task tree.
    pub limits: PlanningLimits,
    /// Maximum number of select/decide/apply rounds.
    pub max_iterations: usize,
    /// Per-invocation timeout for tool capabilities.
    pub invocation_timeout: Duration,
    /// Timeout for a single oracle call.
    pub oracle_timeout: Duration,
    pub retries: RetryPolicy,
    /// Consecutive oracle failures tolerated on one branch before it is failed.
    pub max_consecutive_oracle_failures: usize,
    /// Number of findings shown to the oracle.
    pub view_limit: usize,
    pub priority: PriorityStrategyKind,
    /// Engagement target (host, range or URL), used by fallbacks and parsers.
    pub target: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: PlanningLimits::default(),
            max_iterations: 50,
            invocation_timeout: Duration::from_secs(120),
            oracle_timeout: Duration::from_secs(60),
            retries: RetryPolicy::default(),
            max_consecutive_oracle_failures: 3,
            view_limit: pentree_domain::findings::DEFAULT_VIEW_LIMIT,
            priority: PriorityStrategyKind::default(),
            target: None,
        }
    }
}

impl EngineConfig {
    // ==================== Builder Methods ====================

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.limits.max_depth = max_depth;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.limits.max_tasks = max_tasks;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: RetryPolicy) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_max_consecutive_oracle_failures(mut self, max: usize) -> Self {
        self.max_consecutive_oracle_failures = max;
        self
    }

    pub fn with_view_limit(mut self, limit: usize) -> Self {
        self.view_limit = limit;
        self
    }

    pub fn with_priority(mut self, priority: PriorityStrategyKind) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}
