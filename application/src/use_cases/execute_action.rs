//! Execution coordinator
//!
//! Carries out one tool invocation chosen for a task: resolves the capability,
//! validates parameters, dispatches through the [`ToolGateway`] with a
//! timeout, retries within the class budget, parses the output and commits
//! the findings.
//!
//! Every attempt, including ones that never reach a provider, leaves exactly
//! one [`ExecutionRecord`](pentree_domain::ExecutionRecord).

use std::sync::Arc;
use std::time::{Duration, Instant};

use pentree_domain::{
    ExecutionLog, ExecutionOutcome, MergeSummary, ParameterValidator, ParseContext, ProviderId,
    RecordDraft, SchemaValidator, TaskId, ToolCapability, parse_tool_output,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::ports::engagement_progress::EngagementProgress;
use crate::ports::execution_log::ExecutionLogSink;
use crate::ports::tool_gateway::{InvocationError, ToolGateway};
use crate::use_cases::shared::{CommitError, SharedWorldState, StoreCorruption, is_cancelled};

/// Placeholder provider id for calls that could not be resolved to a provider.
const UNRESOLVED_PROVIDER: &str = "unresolved";

/// Slack past the invocation timeout before the coordinator gives up on a
/// gateway that did not enforce it.
const DISPATCH_GRACE: Duration = Duration::from_secs(5);

/// A requested capability call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Optional when the capability name is unique in the catalog
    pub provider: Option<ProviderId>,
    pub capability: String,
    pub parameters: Map<String, Value>,
}

impl Invocation {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            provider: None,
            capability: capability.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Result of [`ExecutionCoordinator::execute`] over all attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub succeeded: bool,
    /// Outcome of the last attempt
    pub outcome: ExecutionOutcome,
    pub summary: String,
    /// Sequence numbers of the records written, one per attempt
    pub records: Vec<u64>,
    pub merged: MergeSummary,
}

impl ExecutionReport {
    fn failed(outcome: ExecutionOutcome, summary: impl Into<String>, records: Vec<u64>) -> Self {
        Self {
            succeeded: false,
            outcome,
            summary: summary.into(),
            records,
            merged: MergeSummary::default(),
        }
    }
}

pub struct ExecutionCoordinator<G: ToolGateway + ?Sized> {
    gateway: Arc<G>,
    world: SharedWorldState,
    sink: Arc<dyn ExecutionLogSink>,
    validator: SchemaValidator,
    timeout: Duration,
    retries: RetryPolicy,
    target: Option<String>,
}

impl<G: ToolGateway + ?Sized> ExecutionCoordinator<G> {
    pub fn new(
        gateway: Arc<G>,
        world: SharedWorldState,
        sink: Arc<dyn ExecutionLogSink>,
    ) -> Self {
        Self {
            gateway,
            world,
            sink,
            validator: SchemaValidator,
            timeout: Duration::from_secs(120),
            retries: RetryPolicy::default(),
            target: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: RetryPolicy) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    /// Runs `invocation` for `task`.
    ///
    /// Only a corrupted world state is an error; every other failure is
    /// reported through the returned [`ExecutionReport`]. Once `cancel` fires
    /// no further attempts are started.
    pub async fn execute(
        &self,
        task: &TaskId,
        invocation: Invocation,
        log: &mut ExecutionLog,
        progress: &dyn EngagementProgress,
        cancel: &Option<CancellationToken>,
    ) -> Result<ExecutionReport, StoreCorruption> {
        let capability = match self.resolve(&invocation) {
            Ok(capability) => capability,
            Err((outcome, message)) => {
                let provider = invocation
                    .provider
                    .clone()
                    .unwrap_or_else(|| ProviderId::new(UNRESOLVED_PROVIDER));
                let draft = RecordDraft::new(
                    task.clone(),
                    provider,
                    &invocation.capability,
                    invocation.parameters,
                    1,
                )
                .failed(outcome, &message);
                let seq = self.finish(draft, log, progress);
                return Ok(ExecutionReport::failed(outcome, message, vec![seq]));
            }
        };

        let parameters = invocation.parameters;
        if let Err(e) = self.validator.validate(&capability, &parameters) {
            debug!(task = %task, capability = %capability.qualified_name(), error = %e, "Rejected invocation");
            let draft = RecordDraft::new(
                task.clone(),
                capability.provider.clone(),
                &capability.name,
                parameters,
                1,
            )
            .failed(ExecutionOutcome::ValidationError, e.to_string());
            let seq = self.finish(draft, log, progress);
            return Ok(ExecutionReport::failed(
                ExecutionOutcome::ValidationError,
                e.to_string(),
                vec![seq],
            ));
        }

        let max_attempts = 1 + self.retries.retries_for(capability.class);
        let mut records = Vec::new();
        let mut attempt = 1;
        loop {
            progress.on_invocation_start(&capability.provider, &capability.name, attempt);
            let draft = RecordDraft::new(
                task.clone(),
                capability.provider.clone(),
                &capability.name,
                parameters.clone(),
                attempt,
            );
            let started = Instant::now();
            let result = self.dispatch(&capability, &parameters).await;
            let draft = draft.with_duration(started.elapsed());

            let raw = match result {
                Ok(raw) => raw,
                Err(err) => {
                    let draft = draft.failed(err.outcome(), err.to_string());
                    records.push(self.finish(draft, log, progress));

                    let retryable = !matches!(err, InvocationError::ProviderUnavailable(_));
                    if retryable && attempt < max_attempts && !is_cancelled(cancel) {
                        warn!(
                            task = %task,
                            capability = %capability.qualified_name(),
                            attempt,
                            max_attempts,
                            error = %err,
                            "Invocation failed, retrying"
                        );
                        progress.on_retry(&capability.name, attempt + 1, max_attempts, &err.to_string());
                        attempt += 1;
                        continue;
                    }
                    return Ok(ExecutionReport::failed(err.outcome(), err.to_string(), records));
                }
            };

            return match self.interpret(task, &parameters, &raw) {
                Ok((summary, merged)) => {
                    let draft = draft.succeeded(&raw, &summary, merged.total());
                    records.push(self.finish(draft, log, progress));
                    if merged.total() > 0 {
                        progress.on_findings_committed(&merged);
                    }
                    info!(
                        task = %task,
                        capability = %capability.qualified_name(),
                        inserted = merged.inserted,
                        updated = merged.updated,
                        "Invocation succeeded"
                    );
                    Ok(ExecutionReport {
                        succeeded: true,
                        outcome: ExecutionOutcome::Succeeded,
                        summary,
                        records,
                        merged,
                    })
                }
                Err(InterpretError::Corrupted(e)) => {
                    let draft = draft
                        .with_raw(&raw)
                        .failed(ExecutionOutcome::ToolExecutionError, e.to_string());
                    self.finish(draft, log, progress);
                    Err(e)
                }
                Err(InterpretError::Unusable(message)) => {
                    warn!(task = %task, capability = %capability.qualified_name(), error = %message, "Unusable tool output");
                    let draft = draft
                        .with_raw(&raw)
                        .failed(ExecutionOutcome::ToolExecutionError, &message);
                    records.push(self.finish(draft, log, progress));
                    Ok(ExecutionReport::failed(
                        ExecutionOutcome::ToolExecutionError,
                        message,
                        records,
                    ))
                }
            };
        }
    }

    /// Finds the capability in the live catalog.
    fn resolve(
        &self,
        invocation: &Invocation,
    ) -> Result<ToolCapability, (ExecutionOutcome, String)> {
        let catalog = self.gateway.catalog();
        let found = match &invocation.provider {
            Some(provider) => catalog
                .into_iter()
                .find(|c| &c.provider == provider && c.name == invocation.capability),
            None => {
                let mut matching = catalog
                    .into_iter()
                    .filter(|c| c.name == invocation.capability);
                let first = matching.next();
                if first.is_some() && matching.next().is_some() {
                    debug!(capability = %invocation.capability, "Capability offered by several providers, using the first");
                }
                first
            }
        };
        if let Some(capability) = found {
            return Ok(capability);
        }

        if let Some(provider) = &invocation.provider
            && let Some(state) = self.gateway.provider_state(provider)
            && !state.is_live()
        {
            return Err((
                ExecutionOutcome::ProviderUnavailable,
                format!("Provider '{}' is {}", provider, state),
            ));
        }
        let name = match &invocation.provider {
            Some(provider) => format!("{}/{}", provider, invocation.capability),
            None => invocation.capability.clone(),
        };
        Err((
            ExecutionOutcome::ValidationError,
            pentree_domain::ValidationError::UnknownCapability(name).to_string(),
        ))
    }

    async fn dispatch(
        &self,
        capability: &ToolCapability,
        parameters: &Map<String, Value>,
    ) -> Result<String, InvocationError> {
        // The gateway owns the deadline; this only catches a gateway that hangs past it.
        let call = self
            .gateway
            .invoke(&capability.provider, &capability.name, parameters, self.timeout);
        match tokio::time::timeout(self.timeout + DISPATCH_GRACE, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(provider = %capability.provider, capability = %capability.name, "Gateway overran its timeout");
                Err(InvocationError::Timeout(self.timeout))
            }
        }
    }

    fn interpret(
        &self,
        task: &TaskId,
        parameters: &Map<String, Value>,
        raw: &str,
    ) -> Result<(String, MergeSummary), InterpretError> {
        let mut ctx = ParseContext::new(task.clone());
        if let Some(target) = invocation_target(parameters).or(self.target.as_deref()) {
            ctx = ctx.with_target(target);
        }
        let parsed =
            parse_tool_output(raw, &ctx).map_err(|e| InterpretError::Unusable(e.to_string()))?;
        let merged = self.world.commit(parsed.findings).map_err(|e| match e {
            CommitError::Corrupted(e) => InterpretError::Corrupted(e),
            CommitError::Rejected(e) => InterpretError::Unusable(e.to_string()),
        })?;
        Ok((parsed.summary, merged))
    }

    /// Appends the record and hands it to the sink and the progress observer.
    fn finish(
        &self,
        draft: RecordDraft,
        log: &mut ExecutionLog,
        progress: &dyn EngagementProgress,
    ) -> u64 {
        let record = log.append(draft);
        self.sink.record(record);
        progress.on_invocation_complete(record);
        record.seq
    }
}

enum InterpretError {
    Unusable(String),
    Corrupted(StoreCorruption),
}

/// Host-like parameter of the call, used to attribute findings.
fn invocation_target(parameters: &Map<String, Value>) -> Option<&str> {
    ["target", "host", "ip", "address", "rhost"]
        .iter()
        .find_map(|key| parameters.get(*key).and_then(Value::as_str))
}
