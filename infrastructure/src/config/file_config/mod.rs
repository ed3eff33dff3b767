//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly and converted into
//! [`EngineConfig`] and provider descriptors by the caller.

mod engine;
mod log;
mod oracle;
mod tools;

pub use engine::{FileEngineConfig, FileExecutionConfig};
pub use log::FileLogConfig;
pub use oracle::FileOracleConfig;
pub use tools::{FileProviderConfig, FileToolsConfig};

use std::collections::HashSet;
use std::time::Duration;

use pentree_application::EngineConfig;
use pentree_domain::{PlanningLimits, PriorityStrategyKind};
use serde::{Deserialize, Serialize};

use super::validation::{ConfigIssue, ConfigIssueCode};

const PRIORITY_VALUES: &[&str] = &["severity_first", "shallowest_first"];

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Planner budgets and priority strategy
    pub engine: FileEngineConfig,
    /// Invocation timeout and retry budgets
    pub execution: FileExecutionConfig,
    /// Decision oracle endpoint
    pub oracle: FileOracleConfig,
    /// Tool providers
    pub tools: FileToolsConfig,
    /// Log destinations
    pub log: FileLogConfig,
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    ///
    /// Checks:
    /// 1. Priority strategy name
    /// 2. Budgets and timeouts that must be positive
    /// 3. Provider entries (transport, duplicate ids, at least one enabled)
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        // 1. Enum parse validation
        if self.engine.priority.parse::<PriorityStrategyKind>().is_err() {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::InvalidEnumValue {
                    field: "engine.priority".to_string(),
                    value: self.engine.priority.clone(),
                    valid_values: PRIORITY_VALUES.iter().map(|v| v.to_string()).collect(),
                },
                format!(
                    "engine.priority: unknown value '{}', expected one of {}",
                    self.engine.priority,
                    PRIORITY_VALUES.join(", ")
                ),
            ));
        }

        // 2. Zero values
        let required_positive = [
            ("engine.max_depth", self.engine.max_depth as u64),
            ("engine.max_tasks", self.engine.max_tasks as u64),
            ("engine.max_iterations", self.engine.max_iterations as u64),
            (
                "execution.invocation_timeout_secs",
                self.execution.invocation_timeout_secs,
            ),
            ("oracle.timeout_secs", self.oracle.timeout_secs),
            ("tools.connect_timeout_secs", self.tools.connect_timeout_secs),
        ];
        for (field, value) in required_positive {
            if value == 0 {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::ZeroValue {
                        field: field.to_string(),
                    },
                    format!("{field} must be greater than 0"),
                ));
            }
        }
        let clamped = [
            ("tools.connect_attempts", self.tools.connect_attempts),
            ("tools.max_consecutive_timeouts", self.tools.max_consecutive_timeouts),
        ];
        for (field, value) in clamped {
            if value == 0 {
                issues.push(ConfigIssue::warning(
                    ConfigIssueCode::ZeroValue {
                        field: field.to_string(),
                    },
                    format!("{field} is 0, using 1"),
                ));
            }
        }

        // 3. Providers
        let mut seen = HashSet::new();
        for provider in &self.tools.providers {
            if provider.transport().is_none() {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::AmbiguousTransport {
                        provider: provider.id.clone(),
                    },
                    format!(
                        "tools.providers '{}': set exactly one of 'command' or 'address'",
                        provider.id
                    ),
                ));
            }
            if !seen.insert(provider.id.as_str()) {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::DuplicateProvider {
                        provider: provider.id.clone(),
                    },
                    format!("tools.providers: duplicate id '{}'", provider.id),
                ));
            }
        }
        if self.tools.enabled_providers().next().is_none() {
            issues.push(ConfigIssue::warning(
                ConfigIssueCode::NoProviders,
                "no enabled tool provider in [[tools.providers]]",
            ));
        }

        issues
    }

    /// Convert into the engine's run configuration.
    ///
    /// An unknown priority falls back to the default strategy; `validate`
    /// reports it.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            limits: PlanningLimits {
                max_depth: self.engine.max_depth,
                max_tasks: self.engine.max_tasks,
            },
            max_iterations: self.engine.max_iterations,
            invocation_timeout: Duration::from_secs(self.execution.invocation_timeout_secs),
            oracle_timeout: Duration::from_secs(self.oracle.timeout_secs),
            retries: self.execution.retries,
            max_consecutive_oracle_failures: self.engine.max_consecutive_oracle_failures,
            view_limit: self.engine.view_limit,
            priority: self.engine.priority.parse().unwrap_or_default(),
            target: self.engine.target.clone(),
        }
    }
}
