//! Scripted test doubles for the engagement use cases.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pentree_domain::{
    OracleRequest, ParameterKind, ParameterSchema, ParameterSpec, ProviderId, ProviderState,
    ToolCapability,
};
use serde_json::{Map, Value, json};

use crate::ports::decision_oracle::{DecisionOracle, OracleError};
use crate::ports::tool_gateway::{InvocationError, ToolGateway};

/// Oracle answering from per-goal scripts; unscripted calls are unavailable.
#[derive(Default)]
pub(crate) struct ScriptedOracle {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, OracleError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(self, goal: &str, response: impl Into<String>) -> Self {
        self.push(goal, Ok(response.into()))
    }

    pub(crate) fn fail_on(self, goal: &str) -> Self {
        self.push(goal, Err(OracleError::RequestFailed("HTTP 503".into())))
    }

    fn push(self, goal: &str, response: Result<String, OracleError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(goal.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Goals the oracle was asked about, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.calls.lock().unwrap().push(request.task.goal.clone());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.task.goal)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(OracleError::Unavailable("no script".into())))
    }
}

pub(crate) fn invoke(capability: &str, parameters: Value) -> String {
    json!({
        "action": "tool_invocation",
        "capability": capability,
        "parameters": parameters,
    })
    .to_string()
}

pub(crate) fn decompose(goals: &[&str]) -> String {
    json!({"action": "decomposition", "subtasks": goals, "rationale": "split"}).to_string()
}

pub(crate) fn verdict(status: &str) -> String {
    json!({"action": "verdict", "status": status, "rationale": "scripted"}).to_string()
}

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Output(String),
    Fail(String),
    /// Never answers; the caller's timeout has to fire
    Hang,
}

/// In-memory gateway with scripted responses per capability name.
pub(crate) struct StaticGateway {
    capabilities: Vec<ToolCapability>,
    states: Mutex<HashMap<ProviderId, ProviderState>>,
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    invocations: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl StaticGateway {
    pub(crate) fn new(capabilities: Vec<ToolCapability>) -> Self {
        let states = capabilities
            .iter()
            .map(|c| (c.provider.clone(), ProviderState::Ready))
            .collect();
        Self {
            capabilities,
            states: Mutex::new(states),
            responses: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn respond(self, capability: &str, response: Scripted) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(capability.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub(crate) fn set_state(&self, provider: &str, state: ProviderState) {
        self.states
            .lock()
            .unwrap()
            .insert(ProviderId::new(provider), state);
    }

    pub(crate) fn invocations(&self) -> Vec<(String, Map<String, Value>)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolGateway for StaticGateway {
    fn catalog(&self) -> Vec<ToolCapability> {
        let states = self.states.lock().unwrap();
        self.capabilities
            .iter()
            .filter(|c| states.get(&c.provider).is_some_and(ProviderState::is_live))
            .cloned()
            .collect()
    }

    fn provider_states(&self) -> Vec<(ProviderId, ProviderState)> {
        let mut states: Vec<_> = self
            .states
            .lock()
            .unwrap()
            .iter()
            .map(|(id, state)| (id.clone(), *state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    async fn invoke(
        &self,
        provider: &ProviderId,
        capability: &str,
        parameters: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<String, InvocationError> {
        if !self
            .provider_state(provider)
            .is_some_and(|s| s.is_live())
        {
            return Err(InvocationError::ProviderUnavailable(provider.to_string()));
        }
        self.invocations
            .lock()
            .unwrap()
            .push((capability.to_string(), parameters.clone()));
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(capability)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Scripted::Output(String::new()));
        match next {
            Scripted::Output(out) => Ok(out),
            Scripted::Fail(message) => Err(InvocationError::ToolFailed(message)),
            Scripted::Hang => {
                tokio::time::sleep(timeout).await;
                Err(InvocationError::Timeout(timeout))
            }
        }
    }
}

/// Capability with the given required string parameters.
pub(crate) fn capability(provider: &str, name: &str, required: &[&str]) -> ToolCapability {
    let schema = required.iter().fold(ParameterSchema::new(), |schema, p| {
        schema.with_parameter(ParameterSpec::new(*p, ParameterKind::String, true))
    });
    ToolCapability::new(provider, name, "").with_schema(schema)
}

pub(crate) fn nmap_output(host: &str, ports: &[(u16, &str)]) -> String {
    let mut out = format!("Nmap scan report for {}\nPORT     STATE SERVICE\n", host);
    for (port, service) in ports {
        out.push_str(&format!("{}/tcp   open  {}\n", port, service));
    }
    out
}
