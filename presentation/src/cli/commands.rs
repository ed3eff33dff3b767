//! CLI command definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the final report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Status, statistics, task tree and findings
    Summary,
    /// Only the task tree outline
    Tree,
    /// Full engagement snapshot as JSON
    Json,
}

/// CLI arguments for pentree
#[derive(Parser, Debug)]
#[command(name = "pentree")]
#[command(author, version, about = "Autonomous task-tree orchestration for security assessments")]
#[command(long_about = r#"
pentree works through an assessment goal as a tree of tasks. For each task a
decision oracle (an LLM behind an OpenAI-compatible API) chooses to invoke a
tool capability, split the task into subtasks, or conclude it. Tools are
served by MCP providers (local commands or network services).

Only run pentree against systems you are authorized to test.

Configuration files are loaded from (in priority order):
1. PENTREE_* environment variables (e.g. PENTREE_ENGINE__MAX_DEPTH=3)
2. --config <path>     Explicit config file
3. ./pentree.toml      Project-level config
4. ~/.config/pentree/config.toml   Global config

Example:
  pentree --target 10.0.0.5 "enumerate services on 10.0.0.5"
  pentree --offline --max-depth 3 --target 10.0.0.5 "map the attack surface"
  pentree --replay-log logs/engagement-20260314T092653Z.executions.jsonl
"#)]
pub struct Cli {
    /// The engagement goal (not required with --show-config or --replay-log)
    pub goal: Option<String>,

    /// Engagement target (host, range or URL)
    #[arg(short, long, value_name = "TARGET")]
    pub target: Option<String>,

    /// Deepest task tree level (root is 1)
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Maximum number of tasks in the tree
    #[arg(long, value_name = "N")]
    pub max_tasks: Option<usize>,

    /// Maximum number of decision rounds
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<usize>,

    /// Task priority strategy (severity_first, shallowest_first)
    #[arg(long, value_name = "STRATEGY")]
    pub priority: Option<String>,

    /// Per-invocation tool timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Do not call the oracle; every decision uses the built-in fallback
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "summary")]
    pub output: OutputFormat,

    /// Write the engagement snapshot (tree, findings, records) as JSON
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Directory for the diagnostic log and the JSONL execution log
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Print the records of a JSONL execution log and exit
    #[arg(long, value_name = "PATH")]
    pub replay_log: Option<PathBuf>,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress indicators
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long)]
    pub no_config: bool,

    /// Show configuration file locations and exit
    #[arg(long)]
    pub show_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_engagement_flags() {
        let cli = Cli::parse_from([
            "pentree",
            "--target",
            "10.0.0.5",
            "--max-depth",
            "3",
            "--offline",
            "-vv",
            "-o",
            "json",
            "enumerate services",
        ]);
        assert_eq!(cli.goal.as_deref(), Some("enumerate services"));
        assert_eq!(cli.target.as_deref(), Some("10.0.0.5"));
        assert_eq!(cli.max_depth, Some(3));
        assert!(cli.offline);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_goal_is_optional_for_replay() {
        let cli = Cli::parse_from(["pentree", "--replay-log", "run.jsonl"]);
        assert!(cli.goal.is_none());
        assert_eq!(cli.replay_log, Some(PathBuf::from("run.jsonl")));
        assert_eq!(cli.output, OutputFormat::Summary);
    }
}
