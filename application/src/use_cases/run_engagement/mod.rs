//! Run Engagement use case
//!
//! Drives one engagement from a goal to a [`TerminalStatus`]. Each iteration
//! of the loop is strictly sequential:
//!
//! | Step | What happens |
//! |------|--------------|
//! | 1. Checks | cancellation, root resolved, iteration budget, live providers |
//! | 2. Select | [`Planner::select_next_task`] over the current world state |
//! | 3. Decide | [`OracleAdapter::decide`], falling back when the oracle is unavailable |
//! | 4. Act | tool invocation through the [`ExecutionCoordinator`], or a decomposition/verdict |
//! | 5. Apply | [`Planner::apply_outcome`] |
//!
//! Consecutive oracle failures are counted per branch; past the configured
//! ceiling the branch is failed instead of applying another fallback.

mod types;


pub use types::{
    EngagementError, EngagementReport, FatalError, RunEngagementInput, TerminalStatus,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use pentree_domain::{
    AppliedOutcome, Decision, ExecutionLog, ExecutionRecord, Planner, TaskId, TaskOutcome,
    TaskStatus, ViewFilter, WorldState,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::ports::decision_oracle::DecisionOracle;
use crate::ports::engagement_progress::EngagementProgress;
use crate::ports::execution_log::{ExecutionLogSink, NoExecutionLog};
use crate::ports::tool_gateway::ToolGateway;
use crate::use_cases::consult_oracle::{OracleAdapter, OracleOutcome};
use crate::use_cases::execute_action::{ExecutionCoordinator, Invocation};
use crate::use_cases::shared::{SharedWorldState, is_cancelled};

/// Use case for running an autonomous engagement
pub struct RunEngagementUseCase<G: ToolGateway + ?Sized, O: DecisionOracle + ?Sized> {
    gateway: Arc<G>,
    oracle: Arc<O>,
    sink: Arc<dyn ExecutionLogSink>,
    config: EngineConfig,
}

impl<G: ToolGateway + ?Sized, O: DecisionOracle + ?Sized> Clone for RunEngagementUseCase<G, O> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            oracle: self.oracle.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }
}

/// Mutable bookkeeping of one run.
struct RunState {
    planner: Planner,
    world: SharedWorldState,
    log: ExecutionLog,
    target: Option<String>,
    iterations: usize,
    fallbacks: usize,
    /// Consecutive oracle failures per branch root
    oracle_failures: HashMap<TaskId, usize>,
}

impl<G: ToolGateway + ?Sized, O: DecisionOracle + ?Sized> RunEngagementUseCase<G, O> {
    pub fn new(gateway: Arc<G>, oracle: Arc<O>, config: EngineConfig) -> Self {
        Self {
            gateway,
            oracle,
            sink: Arc::new(NoExecutionLog),
            config,
        }
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn ExecutionLogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the engagement to a terminal status.
    ///
    /// Only invalid input or a broken tree invariant returns `Err`; every
    /// other way an engagement can end is a [`TerminalStatus`].
    pub async fn execute(
        &self,
        input: RunEngagementInput,
        progress: &dyn EngagementProgress,
        cancellation: Option<CancellationToken>,
    ) -> Result<EngagementReport, EngagementError> {
        let goal = input.goal.trim().to_string();
        if goal.is_empty() {
            return Err(EngagementError::InvalidInput("goal must not be empty".into()));
        }
        if self.config.max_iterations == 0 {
            return Err(EngagementError::InvalidInput(
                "max_iterations must be at least 1".into(),
            ));
        }

        let started_at = Utc::now();
        let mut planner = Planner::new(self.config.limits, self.config.priority.build());
        planner.create_root_task(goal.as_str())?;

        let mut run = RunState {
            planner,
            world: SharedWorldState::new(),
            log: ExecutionLog::new(),
            target: input.target.or_else(|| self.config.target.clone()),
            iterations: 0,
            fallbacks: 0,
            oracle_failures: HashMap::new(),
        };

        info!(
            goal = %goal,
            target = run.target.as_deref().unwrap_or("-"),
            strategy = run.planner.strategy_name(),
            max_depth = self.config.limits.max_depth,
            max_tasks = self.config.limits.max_tasks,
            "Starting engagement"
        );
        progress.on_engagement_start(&goal);

        let mut status = self.run_loop(&mut run, progress, &cancellation).await?;

        let findings = match run.world.snapshot() {
            Ok(world) => world,
            Err(e) => {
                if !status.is_fatal() {
                    status = TerminalStatus::Fatal(FatalError::StoreCorruption(e.0));
                }
                WorldState::new()
            }
        };

        info!(
            status = %status,
            iterations = run.iterations,
            fallbacks = run.fallbacks,
            records = run.log.len(),
            findings = findings.len(),
            "Engagement finished"
        );
        progress.on_engagement_complete(&status);

        let tree = run.planner.into_tree();
        Ok(EngagementReport {
            goal,
            target: run.target,
            status,
            statistics: tree.statistics(),
            tree,
            findings,
            records: run.log,
            iterations: run.iterations,
            fallbacks: run.fallbacks,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_loop(
        &self,
        run: &mut RunState,
        progress: &dyn EngagementProgress,
        cancellation: &Option<CancellationToken>,
    ) -> Result<TerminalStatus, EngagementError> {
        let adapter = OracleAdapter::new(Arc::clone(&self.oracle), self.config.oracle_timeout)
            .with_target(run.target.clone());
        let coordinator =
            ExecutionCoordinator::new(Arc::clone(&self.gateway), run.world.clone(), Arc::clone(&self.sink))
                .with_timeout(self.config.invocation_timeout)
                .with_retries(self.config.retries)
                .with_target(run.target.clone());

        loop {
            if is_cancelled(cancellation) {
                info!("Engagement cancelled");
                return Ok(TerminalStatus::Cancelled);
            }
            match run.planner.root_status() {
                Some(TaskStatus::Succeeded) => return Ok(TerminalStatus::GoalAchieved),
                Some(_) => return Ok(TerminalStatus::GoalFailed),
                None => {}
            }
            if run.iterations >= self.config.max_iterations {
                warn!(max = self.config.max_iterations, "Iteration budget exhausted");
                return Ok(TerminalStatus::BudgetExhausted);
            }
            if !self.gateway.has_live_provider() {
                warn!("No live tool provider left");
                return Ok(TerminalStatus::Fatal(FatalError::NoProvidersReachable));
            }

            let selected = match run.world.read(|w| run.planner.select_next_task(w)) {
                Ok(selected) => selected,
                Err(e) => return Ok(TerminalStatus::Fatal(FatalError::StoreCorruption(e.0))),
            };
            let Some(task_id) = selected else {
                info!("No eligible task left");
                return Ok(TerminalStatus::Exhausted);
            };
            run.iterations += 1;
            if let Some(task) = run.planner.task(&task_id) {
                debug!(task = %task_id, depth = task.depth, goal = %task.goal, "Selected task");
                progress.on_task_selected(task);
            }

            let view = match run
                .world
                .read(|w| w.view(&ViewFilter::new(self.config.view_limit)))
            {
                Ok(view) => view,
                Err(e) => return Ok(TerminalStatus::Fatal(FatalError::StoreCorruption(e.0))),
            };
            let attempts = run.log.for_task(&task_id).map(describe_attempt).collect();
            let request = run.planner.oracle_request(
                &task_id,
                run.target.clone(),
                view,
                self.gateway.catalog(),
                attempts,
            )?;

            let decided = match cancellation {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => {
                        info!(task = %task_id, "Engagement cancelled during oracle call");
                        return Ok(TerminalStatus::Cancelled);
                    }
                    outcome = adapter.decide(&request, &run.log) => outcome,
                },
                None => adapter.decide(&request, &run.log).await,
            };

            if !self.track_oracle_failures(run, &task_id, &decided, progress)? {
                continue;
            }
            if let Some(task) = run.planner.task(&task_id) {
                progress.on_decision(task, &decided.decision, &decided.source);
            }

            let outcome = match decided.decision {
                Decision::ToolInvocation {
                    provider,
                    capability,
                    parameters,
                    ..
                } => {
                    run.planner.begin_execution(&task_id)?;
                    let invocation = Invocation {
                        provider,
                        capability,
                        parameters,
                    };
                    let report = match coordinator
                        .execute(&task_id, invocation, &mut run.log, progress, cancellation)
                        .await
                    {
                        Ok(report) => report,
                        Err(e) => {
                            return Ok(TerminalStatus::Fatal(FatalError::StoreCorruption(e.0)));
                        }
                    };
                    TaskOutcome::Executed {
                        succeeded: report.succeeded,
                        summary: report.summary,
                        records: report.records,
                    }
                }
                Decision::Decomposition {
                    subtasks,
                    rationale,
                } => TaskOutcome::Decomposed {
                    subtasks,
                    rationale,
                },
                Decision::Verdict { status, rationale } => TaskOutcome::Verdict { status, rationale },
            };

            match run.planner.apply_outcome(&task_id, outcome)? {
                AppliedOutcome::Expanded {
                    children,
                    truncated,
                } => {
                    debug!(task = %task_id, children = children.len(), truncated, "Task decomposed");
                    if truncated > 0 {
                        warn!(task = %task_id, truncated, "Task budget exhausted, subtasks dropped");
                    }
                }
                AppliedOutcome::Forced { reason, .. } => {
                    info!(task = %task_id, reason = %reason, "Decomposition refused, verdict forced");
                    self.notify_resolved(run, &task_id, progress);
                }
                AppliedOutcome::Resolved { status } => {
                    debug!(task = %task_id, status = %status, "Task resolved");
                    self.notify_resolved(run, &task_id, progress);
                }
            }
        }
    }

    /// Updates the per-branch failure counter. Returns `false` when the
    /// branch was failed and the decision must not be applied.
    fn track_oracle_failures(
        &self,
        run: &mut RunState,
        task_id: &TaskId,
        decided: &OracleOutcome,
        progress: &dyn EngagementProgress,
    ) -> Result<bool, EngagementError> {
        let Some(branch) = run.planner.tree().branch_root(task_id) else {
            return Ok(true);
        };
        if !decided.source.is_fallback() {
            run.oracle_failures.remove(&branch);
            return Ok(true);
        }

        let failures = run.oracle_failures.entry(branch.clone()).or_default();
        *failures += 1;
        if *failures <= self.config.max_consecutive_oracle_failures {
            run.fallbacks += 1;
            return Ok(true);
        }

        let reason = format!("{} consecutive oracle failures", failures);
        run.oracle_failures.remove(&branch);
        warn!(branch = %branch, task = %task_id, reason = %reason, "Failing branch");
        let branch = run.planner.fail_branch(task_id, &reason)?;
        progress.on_branch_failed(&branch, &reason);
        Ok(false)
    }

    fn notify_resolved(&self, run: &RunState, task_id: &TaskId, progress: &dyn EngagementProgress) {
        if let Some(task) = run.planner.task(task_id) {
            progress.on_task_resolved(task);
        }
    }
}

fn describe_attempt(record: &ExecutionRecord) -> String {
    let detail = record
        .summary
        .as_deref()
        .or(record.error.as_deref())
        .unwrap_or("");
    format!(
        "{} (attempt {}): {} {}",
        record.capability, record.attempt, record.outcome, detail
    )
    .trim_end()
    .to_string()
}
