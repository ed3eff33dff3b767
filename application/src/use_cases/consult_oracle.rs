//! Decision oracle adapter.
//!
//! Wraps a [`DecisionOracle`] with a timeout, parses its response into a
//! [`Decision`], and substitutes a deterministic fallback when the oracle is
//! unavailable. The caller always learns which of the two it got through
//! [`DecisionSource`].
//!
//! # Fallback policy
//!
//! | Task | Fallback decision |
//! |------|-------------------|
//! | leaf | cheapest reconnaissance capability not yet invoked whose required parameters can be filled from the target |
//! | leaf, nothing applicable | `Verdict{failed}` |
//! | review (children resolved) | verdict derived from the children |
//!
//! "Cheapest" means fewest required parameters, then fewest parameters, then
//! name order.

use std::sync::Arc;
use std::time::Duration;

use pentree_domain::{
    CapabilityClass, Decision, ExecutionLog, OracleRequest, TaskStatus, ToolCapability,
    VerdictStatus, parse_decision,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ports::decision_oracle::DecisionOracle;

/// Parameter names that the fallback fills with the engagement target.
const TARGET_PARAMETERS: &[&str] = &[
    "target", "targets", "host", "hosts", "ip", "address", "rhost", "rhosts", "domain", "url",
];

/// Why the oracle could not provide a decision.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OracleUnavailable {
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle call failed: {0}")]
    CallFailed(String),

    #[error("oracle response unusable: {0}")]
    Unparseable(String),
}

/// Where a decision came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DecisionSource {
    Oracle,
    Fallback { reason: OracleUnavailable },
}

impl DecisionSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, DecisionSource::Fallback { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleOutcome {
    pub decision: Decision,
    pub source: DecisionSource,
}

pub struct OracleAdapter<O: DecisionOracle + ?Sized> {
    oracle: Arc<O>,
    timeout: Duration,
    target: Option<String>,
}

impl<O: DecisionOracle + ?Sized> OracleAdapter<O> {
    pub fn new(oracle: Arc<O>, timeout: Duration) -> Self {
        Self {
            oracle,
            timeout,
            target: None,
        }
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    /// Obtain a decision for `request`. Never fails: oracle problems turn
    /// into a fallback decision tagged with the reason.
    pub async fn decide(&self, request: &OracleRequest, log: &ExecutionLog) -> OracleOutcome {
        match self.ask(request).await {
            Ok(decision) => {
                debug!(
                    oracle = self.oracle.name(),
                    task = %request.task.id,
                    action = decision.kind(),
                    "Oracle decision"
                );
                OracleOutcome {
                    decision,
                    source: DecisionSource::Oracle,
                }
            }
            Err(reason) => {
                warn!(
                    oracle = self.oracle.name(),
                    task = %request.task.id,
                    reason = %reason,
                    "Oracle unavailable, using fallback"
                );
                OracleOutcome {
                    decision: fallback_decision(request, log, self.target.as_deref()),
                    source: DecisionSource::Fallback { reason },
                }
            }
        }
    }

    async fn ask(&self, request: &OracleRequest) -> Result<Decision, OracleUnavailable> {
        let response = tokio::time::timeout(self.timeout, self.oracle.decide(request))
            .await
            .map_err(|_| OracleUnavailable::Timeout(self.timeout))?
            .map_err(|e| OracleUnavailable::CallFailed(e.to_string()))?;
        parse_decision(&response).map_err(|e| OracleUnavailable::Unparseable(e.to_string()))
    }
}

/// The deterministic decision used when the oracle is unavailable.
pub fn fallback_decision(
    request: &OracleRequest,
    log: &ExecutionLog,
    target: Option<&str>,
) -> Decision {
    let task = &request.task;
    if task.is_review() {
        let succeeded = task
            .children
            .iter()
            .filter(|c| c.status == TaskStatus::Succeeded)
            .count();
        let failed = task
            .children
            .iter()
            .any(|c| c.status == TaskStatus::Failed);
        let status = if succeeded > 0 && !failed {
            VerdictStatus::Succeeded
        } else {
            VerdictStatus::Failed
        };
        return Decision::verdict(
            status,
            format!(
                "fallback: {}/{} subtasks succeeded",
                succeeded,
                task.children.len()
            ),
        );
    }

    let target = target.or(request.target.as_deref());
    let mut candidates: Vec<(&ToolCapability, Map<String, Value>)> = request
        .catalog
        .iter()
        .filter(|c| c.class == CapabilityClass::Reconnaissance)
        .filter(|c| !log.was_invoked(&c.provider, &c.name))
        .filter_map(|c| fill_parameters(c, target).map(|params| (c, params)))
        .collect();
    candidates.sort_by(|(a, _), (b, _)| {
        a.schema
            .required_count()
            .cmp(&b.schema.required_count())
            .then(a.schema.parameters.len().cmp(&b.schema.parameters.len()))
            .then_with(|| a.qualified_name().cmp(&b.qualified_name()))
    });

    match candidates.into_iter().next() {
        Some((capability, parameters)) => Decision::ToolInvocation {
            provider: Some(capability.provider.clone()),
            capability: capability.name.clone(),
            parameters,
            rationale: Some("fallback: cheapest unexplored reconnaissance".to_string()),
        },
        None => Decision::verdict(
            VerdictStatus::Failed,
            "fallback: no applicable reconnaissance capability left",
        ),
    }
}

/// Required parameters filled from the target, or `None` if one cannot be.
fn fill_parameters(capability: &ToolCapability, target: Option<&str>) -> Option<Map<String, Value>> {
    let mut parameters = Map::new();
    for spec in capability.schema.required() {
        let name = spec.name.to_lowercase();
        if !TARGET_PARAMETERS.contains(&name.as_str()) {
            return None;
        }
        let value = target?;
        let value = if name == "url" && !value.contains("://") {
            format!("http://{}", value)
        } else {
            value.to_string()
        };
        let value = match spec.kind {
            pentree_domain::ParameterKind::Array => Value::Array(vec![Value::String(value)]),
            _ => Value::String(value),
        };
        parameters.insert(spec.name.clone(), value);
    }
    Some(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::decision_oracle::OracleError;
    use async_trait::async_trait;
    use pentree_domain::{
        ParameterKind, ParameterSchema, ParameterSpec, ProviderId, RecordDraft, TaskContext,
        TaskId, TaskSummary, WorldView,
    };
    use std::sync::Mutex;

    struct FixedOracle {
        responses: Mutex<Vec<Result<String, OracleError>>>,
        delay: Option<Duration>,
    }

    impl FixedOracle {
        fn new(responses: Vec<Result<String, OracleError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl DecisionOracle for FixedOracle {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn decide(&self, _request: &OracleRequest) -> Result<String, OracleError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(OracleError::Unavailable("exhausted".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn capability(name: &str, required: &[&str], optional: &[&str]) -> ToolCapability {
        let mut schema = ParameterSchema::new();
        for r in required {
            schema = schema.with_parameter(ParameterSpec::new(*r, ParameterKind::String, true));
        }
        for o in optional {
            schema = schema.with_parameter(ParameterSpec::new(*o, ParameterKind::String, false));
        }
        ToolCapability::new("kit", name, "").with_schema(schema)
    }

    fn request(catalog: Vec<ToolCapability>, children: Vec<TaskSummary>) -> OracleRequest {
        OracleRequest {
            engagement_goal: "assess 10.0.0.5".into(),
            target: Some("10.0.0.5".into()),
            task: TaskContext {
                id: TaskId::new("t1"),
                goal: "assess 10.0.0.5".into(),
                depth: 1,
                rationale: None,
                can_decompose: true,
                children,
                attempts: Vec::new(),
            },
            ancestors: Vec::new(),
            world: WorldView::default(),
            catalog,
            tree_outline: String::new(),
        }
    }

    #[tokio::test]
    async fn test_oracle_decision_passes_through() {
        let oracle = Arc::new(FixedOracle::new(vec![Ok(
            r#"{"action": "verdict", "status": "succeeded", "rationale": "done"}"#.into(),
        )]));
        let adapter = OracleAdapter::new(oracle, Duration::from_secs(5));
        let outcome = adapter
            .decide(&request(Vec::new(), Vec::new()), &ExecutionLog::new())
            .await;
        assert_eq!(outcome.source, DecisionSource::Oracle);
        assert_eq!(
            outcome.decision,
            Decision::verdict(VerdictStatus::Succeeded, "done")
        );
    }

    #[tokio::test]
    async fn test_unparseable_response_falls_back() {
        let oracle = Arc::new(FixedOracle::new(vec![Ok("let me think...".into())]));
        let adapter = OracleAdapter::new(oracle, Duration::from_secs(5));
        let outcome = adapter
            .decide(
                &request(vec![capability("port_scan", &["target"], &[])], Vec::new()),
                &ExecutionLog::new(),
            )
            .await;
        assert!(matches!(
            outcome.source,
            DecisionSource::Fallback {
                reason: OracleUnavailable::Unparseable(_)
            }
        ));
        assert_eq!(outcome.decision.kind(), "tool_invocation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_oracle_times_out() {
        let mut oracle = FixedOracle::new(vec![Ok("{}".into())]);
        oracle.delay = Some(Duration::from_secs(600));
        let adapter = OracleAdapter::new(Arc::new(oracle), Duration::from_secs(30));
        let outcome = adapter
            .decide(&request(Vec::new(), Vec::new()), &ExecutionLog::new())
            .await;
        assert_eq!(
            outcome.source,
            DecisionSource::Fallback {
                reason: OracleUnavailable::Timeout(Duration::from_secs(30))
            }
        );
        assert_eq!(
            outcome.decision,
            Decision::verdict(
                VerdictStatus::Failed,
                "fallback: no applicable reconnaissance capability left"
            )
        );
    }

    #[test]
    fn test_fallback_picks_cheapest_unexplored_recon() {
        let catalog = vec![
            capability("full_scan", &["target", "ports"], &[]),
            capability("ping_sweep", &["target"], &["count"]),
            capability("port_scan", &["target"], &[]),
            capability("hydra_brute", &["target"], &[]),
        ];
        let mut log = ExecutionLog::new();
        let decision = fallback_decision(&request(catalog.clone(), Vec::new()), &log, None);
        let Decision::ToolInvocation {
            capability,
            parameters,
            ..
        } = decision
        else {
            panic!("expected tool invocation");
        };
        assert_eq!(capability, "port_scan");
        assert_eq!(parameters["target"], "10.0.0.5");

        log.append(RecordDraft::new(
            TaskId::new("t1"),
            ProviderId::new("kit"),
            "port_scan",
            Map::new(),
            1,
        ));
        let Decision::ToolInvocation { capability, .. } =
            fallback_decision(&request(catalog, Vec::new()), &log, None)
        else {
            panic!("expected tool invocation");
        };
        // full_scan needs "ports", which cannot be filled from the target
        assert_eq!(capability, "ping_sweep");
    }

    #[test]
    fn test_fallback_for_review_derives_verdict() {
        let children = vec![
            TaskSummary {
                id: TaskId::new("t2"),
                goal: "scan".into(),
                status: TaskStatus::Succeeded,
                outcome: None,
            },
            TaskSummary {
                id: TaskId::new("t3"),
                goal: "enumerate".into(),
                status: TaskStatus::Skipped,
                outcome: None,
            },
        ];
        let decision = fallback_decision(&request(Vec::new(), children), &ExecutionLog::new(), None);
        assert_eq!(
            decision,
            Decision::verdict(VerdictStatus::Succeeded, "fallback: 1/2 subtasks succeeded")
        );
    }

    #[test]
    fn test_url_parameter_gets_scheme() {
        let cap = capability("web_discover", &["url"], &[]);
        let params = fill_parameters(&cap, Some("10.0.0.5")).unwrap();
        assert_eq!(params["url"], "http://10.0.0.5");
        assert!(fill_parameters(&cap, None).is_none());
    }
}
