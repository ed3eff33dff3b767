//! Oracle decisions and their parsing from response text.
//!
//! A decision is exactly one of three actions, tagged by `"action"`:
//!
//! ```json
//! {"action": "tool_invocation", "provider": "nmap", "capability": "port_scan",
//!  "parameters": {"target": "10.0.0.5"}, "rationale": "..."}
//! {"action": "decomposition", "subtasks": ["run port scan", {"goal": "...", "priority": 8}]}
//! {"action": "verdict", "status": "succeeded", "rationale": "..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tool::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    #[serde(alias = "success", alias = "completed", alias = "achieved")]
    Succeeded,
    #[serde(alias = "failure", alias = "unachievable")]
    Failed,
}

impl VerdictStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, VerdictStatus::Succeeded)
    }
}

/// A child goal proposed by a decomposition.
///
/// Accepts either a bare string or `{"goal", "priority", "rationale"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SubtaskRepr")]
pub struct Subtask {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Subtask {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            priority: None,
            rationale: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubtaskRepr {
    Text(String),
    Detailed {
        #[serde(alias = "description")]
        goal: String,
        #[serde(default)]
        priority: Option<u8>,
        #[serde(default)]
        rationale: Option<String>,
    },
}

impl From<SubtaskRepr> for Subtask {
    fn from(repr: SubtaskRepr) -> Self {
        match repr {
            SubtaskRepr::Text(goal) => Subtask::new(goal),
            SubtaskRepr::Detailed {
                goal,
                priority,
                rationale,
            } => Subtask {
                goal,
                priority,
                rationale,
            },
        }
    }
}

/// The closed set of actions an oracle may choose for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    #[serde(alias = "invoke", alias = "tool")]
    ToolInvocation {
        /// May be omitted when the capability name is unique in the catalog
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<ProviderId>,
        #[serde(alias = "tool")]
        capability: String,
        #[serde(default, alias = "arguments", alias = "params")]
        parameters: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    #[serde(alias = "decompose")]
    Decomposition {
        #[serde(alias = "subgoals", alias = "tasks")]
        subtasks: Vec<Subtask>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    Verdict {
        status: VerdictStatus,
        #[serde(default)]
        rationale: String,
    },
}

impl Decision {
    pub fn verdict(status: VerdictStatus, rationale: impl Into<String>) -> Self {
        Decision::Verdict {
            status,
            rationale: rationale.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decision::ToolInvocation { .. } => "tool_invocation",
            Decision::Decomposition { .. } => "decomposition",
            Decision::Verdict { .. } => "verdict",
        }
    }

    pub fn rationale(&self) -> Option<&str> {
        match self {
            Decision::ToolInvocation { rationale, .. } | Decision::Decomposition { rationale, .. } => {
                rationale.as_deref()
            }
            Decision::Verdict { rationale, .. } => Some(rationale.as_str()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecisionParseError {
    #[error("Response contains no JSON object")]
    NoJson,

    #[error("Response is not a single decision: {0}")]
    Invalid(String),

    #[error("Decision is incomplete: {0}")]
    Incomplete(&'static str),
}

/// Parse exactly one decision from oracle response text.
///
/// Looks for, in order: a fenced code block (` ```json ` or bare ` ``` `),
/// the whole response as JSON, then the outermost `{...}` span.
pub fn parse_decision(response: &str) -> Result<Decision, DecisionParseError> {
    let candidate = extract_json(response).ok_or(DecisionParseError::NoJson)?;
    let value: Value = serde_json::from_str(&candidate)
        .map_err(|e| DecisionParseError::Invalid(e.to_string()))?;
    if !value.is_object() {
        return Err(DecisionParseError::Invalid(
            "expected a JSON object".to_string(),
        ));
    }
    let decision: Decision =
        serde_json::from_value(value).map_err(|e| DecisionParseError::Invalid(e.to_string()))?;
    check_complete(&decision)?;
    Ok(decision)
}

fn check_complete(decision: &Decision) -> Result<(), DecisionParseError> {
    match decision {
        Decision::ToolInvocation { capability, .. } if capability.trim().is_empty() => {
            Err(DecisionParseError::Incomplete("tool invocation without capability"))
        }
        Decision::Decomposition { subtasks, .. }
            if subtasks.iter().all(|s| s.goal.trim().is_empty()) =>
        {
            Err(DecisionParseError::Incomplete("decomposition without subtasks"))
        }
        _ => Ok(()),
    }
}

fn extract_json(response: &str) -> Option<String> {
    let mut in_block = false;
    let mut block = String::new();
    for line in response.lines() {
        let trimmed = line.trim();
        if !in_block && (trimmed == "```json" || trimmed == "```") {
            in_block = true;
            block.clear();
        } else if in_block && trimmed == "```" {
            if !block.trim().is_empty() {
                return Some(block);
            }
            in_block = false;
        } else if in_block {
            block.push_str(line);
            block.push('\n');
        }
    }

    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| response[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_invocation() {
        let decision = parse_decision(
            r#"{"action": "tool_invocation", "provider": "nmap", "capability": "port_scan",
                "parameters": {"target": "10.0.0.5"}, "rationale": "start with recon"}"#,
        )
        .unwrap();
        match decision {
            Decision::ToolInvocation {
                provider,
                capability,
                parameters,
                rationale,
            } => {
                assert_eq!(provider, Some(ProviderId::new("nmap")));
                assert_eq!(capability, "port_scan");
                assert_eq!(parameters["target"], "10.0.0.5");
                assert_eq!(rationale.as_deref(), Some("start with recon"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_parse_decomposition_mixed_subtasks() {
        let response = "Plan below.\n```json\n{\"action\": \"decomposition\", \"subtasks\": [\"run port scan\", {\"description\": \"grab banners\", \"priority\": 8}]}\n```\n";
        let Decision::Decomposition { subtasks, .. } = parse_decision(response).unwrap() else {
            panic!("expected decomposition");
        };
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[0], Subtask::new("run port scan"));
        assert_eq!(subtasks[1].goal, "grab banners");
        assert_eq!(subtasks[1].priority, Some(8));
    }

    #[test]
    fn test_parse_verdict_with_surrounding_text() {
        let response = r#"The scan found what we need. {"action": "verdict", "status": "success", "rationale": "2 services"} Done."#;
        assert_eq!(
            parse_decision(response).unwrap(),
            Decision::verdict(VerdictStatus::Succeeded, "2 services")
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = parse_decision(r#"{"action": "dance"}"#).unwrap_err();
        assert!(matches!(err, DecisionParseError::Invalid(_)));
    }

    #[test]
    fn test_no_json() {
        assert_eq!(
            parse_decision("I think we should scan first.").unwrap_err(),
            DecisionParseError::NoJson
        );
    }

    #[test]
    fn test_empty_decomposition_is_incomplete() {
        let err = parse_decision(r#"{"action": "decomposition", "subtasks": []}"#).unwrap_err();
        assert_eq!(
            err,
            DecisionParseError::Incomplete("decomposition without subtasks")
        );
    }

    #[test]
    fn test_decision_serializes_with_action_tag() {
        let json = serde_json::to_value(Decision::verdict(VerdictStatus::Failed, "no route")).unwrap();
        assert_eq!(json["action"], "verdict");
        assert_eq!(json["status"], "failed");
    }
}
