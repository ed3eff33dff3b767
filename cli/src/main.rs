//! CLI entrypoint for pentree
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use pentree_application::{
    DecisionOracle, EngagementProgress, EngagementReport, ExecutionLogSink, FatalError,
    NoEngagementProgress, RunEngagementInput, RunEngagementUseCase, TerminalStatus,
};
use pentree_infrastructure::{
    ConfigLoader, FileConfig, JsonlExecutionLog, McpToolProvider, OfflineOracle,
    OpenAiCompatibleOracle, ProviderRegistry,
};
use pentree_presentation::{
    Cli, ConsoleFormatter, OutputFormat, ProgressReporter, SimpleProgress,
};
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.show_config {
        ConfigLoader::print_config_sources(cli.config.as_deref());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(path) = &cli.replay_log {
        let records = JsonlExecutionLog::read_records(path)?;
        println!("{}", ConsoleFormatter::format_records(&records));
        return Ok(ExitCode::SUCCESS);
    }

    // Load configuration
    let mut config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_deref())?
    };
    apply_overrides(&mut config, &cli);

    let _log_guard = init_logging(cli.verbose, config.log.dir.as_deref())?;

    let issues = config.validate();
    for issue in &issues {
        if issue.is_error() {
            eprintln!("{} {}", "error:".red().bold(), issue.message);
        } else {
            eprintln!("{} {}", "warning:".yellow().bold(), issue.message);
        }
    }
    if issues.iter().any(|i| i.is_error()) {
        bail!("Invalid configuration");
    }

    let goal = match cli.goal.as_deref() {
        Some(goal) if !goal.trim().is_empty() => goal.to_string(),
        _ => bail!("A goal is required. See --help for usage."),
    };

    info!("Starting pentree");

    // === Dependency Injection ===
    // Tool providers
    let mut registry = ProviderRegistry::new(config.tools.registry_settings());
    for provider in config.tools.enabled_providers() {
        match provider.transport() {
            Some(transport) => {
                registry = registry.register(McpToolProvider::new(provider.id.as_str(), transport));
            }
            None => warn!(provider = %provider.id, "Skipping provider without a usable transport"),
        }
    }
    let registry = Arc::new(registry);

    let report = registry.connect_all().await;
    for (id, reason) in &report.failed {
        eprintln!(
            "{} provider {} unavailable: {}",
            "warning:".yellow().bold(),
            id,
            reason
        );
    }
    if !report.any_connected() {
        registry.shutdown_all().await;
        eprintln!("{} no tool provider is reachable", "error:".red().bold());
        return Ok(exit_code(&TerminalStatus::Fatal(FatalError::NoProvidersReachable)));
    }

    let cancellation = CancellationToken::new();
    let keepalive = config
        .tools
        .keepalive_interval()
        .map(|interval| registry.spawn_keepalive(interval, cancellation.child_token()));

    // Decision oracle
    let oracle: Arc<dyn DecisionOracle> = if config.oracle.offline {
        info!("Oracle disabled, using fallback decisions only");
        Arc::new(OfflineOracle)
    } else {
        Arc::new(
            OpenAiCompatibleOracle::new(config.oracle.endpoint.as_str(), config.oracle.model.as_str())
                .with_api_key(config.oracle.api_key())
                .with_temperature(config.oracle.temperature)
                .with_max_tokens(config.oracle.max_tokens),
        )
    };

    let mut use_case = RunEngagementUseCase::new(
        Arc::clone(&registry),
        oracle,
        config.engine_config(),
    );
    if config.log.execution_log
        && let Some(dir) = &config.log.dir
    {
        match JsonlExecutionLog::in_dir(dir, Utc::now()) {
            Some(log) => {
                info!(path = %log.path().display(), "Writing execution log");
                let sink: Arc<dyn ExecutionLogSink> = Arc::new(log);
                use_case = use_case.with_log_sink(sink);
            }
            None => warn!(dir = %dir.display(), "Execution log disabled"),
        }
    }

    // Ctrl-C cancels the engagement at the next safe point
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} cancelling engagement...", "!".yellow());
            ctrl_c.cancel();
        }
    });

    let mut input = RunEngagementInput::new(goal);
    if let Some(target) = &cli.target {
        input = input.with_target(target.as_str());
    }

    // Spinners only make sense on a terminal
    let progress: Box<dyn EngagementProgress> = if cli.quiet {
        Box::new(NoEngagementProgress)
    } else if std::io::stderr().is_terminal() {
        Box::new(ProgressReporter::new())
    } else {
        Box::new(SimpleProgress)
    };

    let result = use_case
        .execute(input, progress.as_ref(), Some(cancellation.clone()))
        .await;

    cancellation.cancel();
    if let Some(handle) = keepalive {
        let _ = handle.await;
    }
    registry.shutdown_all().await;

    let report = result?;

    let output = match cli.output {
        OutputFormat::Summary => ConsoleFormatter::format(&report),
        OutputFormat::Tree => ConsoleFormatter::format_tree(&report),
        OutputFormat::Json => ConsoleFormatter::format_json(&report),
    };
    println!("{}", output);

    if let Some(path) = &cli.export {
        export_snapshot(&report, path)?;
        info!(path = %path.display(), "Snapshot written");
    }

    Ok(exit_code(&report.status))
}

/// Command-line flags take precedence over every config source.
fn apply_overrides(config: &mut FileConfig, cli: &Cli) {
    if let Some(target) = &cli.target {
        config.engine.target = Some(target.clone());
    }
    if let Some(max_depth) = cli.max_depth {
        config.engine.max_depth = max_depth;
    }
    if let Some(max_tasks) = cli.max_tasks {
        config.engine.max_tasks = max_tasks;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.engine.max_iterations = max_iterations;
    }
    if let Some(priority) = &cli.priority {
        config.engine.priority = priority.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.execution.invocation_timeout_secs = timeout;
    }
    if cli.offline {
        config.oracle.offline = true;
    }
    if let Some(dir) = &cli.log_dir {
        config.log.dir = Some(dir.clone());
    }
}

/// Console logging follows `-v` (or `RUST_LOG` when no `-v` is given).
/// With a log directory, everything at debug and above also goes to
/// `pentree.log` there.
fn init_logging(verbose: u8, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(console).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(dir, "pentree.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(Some(guard))
}

fn export_snapshot(report: &EngagementReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("cannot write snapshot to {}", path.display()))?;
    Ok(())
}

fn exit_code(status: &TerminalStatus) -> ExitCode {
    match status {
        TerminalStatus::GoalAchieved
        | TerminalStatus::Exhausted
        | TerminalStatus::BudgetExhausted => ExitCode::SUCCESS,
        TerminalStatus::GoalFailed => ExitCode::from(1),
        TerminalStatus::Fatal(_) => ExitCode::from(2),
        TerminalStatus::Cancelled => ExitCode::from(130),
    }
}
