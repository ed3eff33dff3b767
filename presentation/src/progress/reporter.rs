//! Progress reporting during an engagement

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pentree_application::{DecisionSource, EngagementProgress, TerminalStatus};
use pentree_domain::{
    Decision, ExecutionRecord, MergeSummary, ProviderId, Task, TaskId, TaskStatus,
};
use std::sync::Mutex;
use std::time::Duration;

/// Reports progress with a spinner for the current activity and one line
/// per event printed above it.
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner: Mutex<Option<ProgressBar>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            spinner: Mutex::new(None),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.bold.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn println(&self, line: String) {
        // Falls back to stderr when the draw target is hidden
        if self.multi.println(&line).is_err() {
            eprintln!("{}", line);
        }
    }

    fn set_activity(&self, prefix: &str, message: String) {
        let guard = self.spinner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = guard.as_ref() {
            pb.set_prefix(prefix.to_string());
            pb.set_message(message);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EngagementProgress for ProgressReporter {
    fn on_engagement_start(&self, goal: &str) {
        self.println(format!("{} {}", "->".cyan(), goal.bold()));

        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(Self::spinner_style());
        pb.set_prefix("start");
        pb.enable_steady_tick(Duration::from_millis(120));
        *self.spinner.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
    }

    fn on_task_selected(&self, task: &Task) {
        self.set_activity("decide", format!("{} {}", task.id, truncate(&task.goal, 60)));
    }

    fn on_decision(&self, task: &Task, decision: &Decision, source: &DecisionSource) {
        let marker = if source.is_fallback() {
            "fallback".yellow().to_string()
        } else {
            "oracle".dimmed().to_string()
        };
        self.println(format!(
            "  {} {} {} [{}]",
            task.id.to_string().bold(),
            "<-".cyan(),
            describe_decision(decision),
            marker
        ));
    }

    fn on_invocation_start(&self, provider: &ProviderId, capability: &str, attempt: u32) {
        let suffix = if attempt > 1 {
            format!(" (attempt {})", attempt)
        } else {
            String::new()
        };
        self.set_activity("invoke", format!("{}/{}{}", provider, capability, suffix));
    }

    fn on_invocation_complete(&self, record: &ExecutionRecord) {
        self.println(format!("    {}", describe_record(record)));
    }

    fn on_retry(&self, capability: &str, attempt: u32, max_attempts: u32, reason: &str) {
        self.println(format!(
            "    {} retrying {} ({}/{}): {}",
            "!".yellow(),
            capability,
            attempt,
            max_attempts,
            reason
        ));
    }

    fn on_findings_committed(&self, summary: &MergeSummary) {
        if summary.total() > 0 {
            self.println(format!(
                "    {} {} new, {} updated findings",
                "+".green(),
                summary.inserted,
                summary.updated
            ));
        }
    }

    fn on_task_resolved(&self, task: &Task) {
        self.println(format!("  {}", describe_resolution(task)));
    }

    fn on_branch_failed(&self, branch: &TaskId, reason: &str) {
        self.println(format!("  {} branch {} failed: {}", "x".red(), branch, reason));
    }

    fn on_engagement_complete(&self, status: &TerminalStatus) {
        if let Some(pb) = self.spinner.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pb.finish_and_clear();
        }
        self.println(format!("{} {}", "=>".cyan(), status_label(status)));
    }
}

/// Simple text-based progress (no spinner)
pub struct SimpleProgress;

impl EngagementProgress for SimpleProgress {
    fn on_engagement_start(&self, goal: &str) {
        eprintln!("{} {}", "->".cyan(), goal.bold());
    }

    fn on_decision(&self, task: &Task, decision: &Decision, source: &DecisionSource) {
        let marker = if source.is_fallback() { " [fallback]" } else { "" };
        eprintln!("  {} {}{}", task.id, describe_decision(decision), marker);
    }

    fn on_invocation_complete(&self, record: &ExecutionRecord) {
        eprintln!("    {}", describe_record(record));
    }

    fn on_task_resolved(&self, task: &Task) {
        eprintln!("  {}", describe_resolution(task));
    }

    fn on_branch_failed(&self, branch: &TaskId, reason: &str) {
        eprintln!("  {} branch {} failed: {}", "x".red(), branch, reason);
    }

    fn on_engagement_complete(&self, status: &TerminalStatus) {
        eprintln!("{} {}", "=>".cyan(), status_label(status));
    }
}

fn describe_decision(decision: &Decision) -> String {
    match decision {
        Decision::ToolInvocation {
            provider,
            capability,
            ..
        } => match provider {
            Some(p) => format!("invoke {}/{}", p, capability),
            None => format!("invoke {}", capability),
        },
        Decision::Decomposition { subtasks, .. } => {
            format!("decompose into {} subtasks", subtasks.len())
        }
        Decision::Verdict { status, .. } => {
            if status.is_success() {
                "verdict: succeeded".to_string()
            } else {
                "verdict: failed".to_string()
            }
        }
    }
}

fn describe_record(record: &ExecutionRecord) -> String {
    let mark = if record.outcome.is_success() {
        "v".green()
    } else {
        "x".red()
    };
    let detail = record
        .summary
        .as_deref()
        .or(record.error.as_deref())
        .unwrap_or("");
    format!(
        "{} {}/{} {} ({} ms) {}",
        mark,
        record.provider_id,
        record.capability,
        record.outcome,
        record.duration_ms,
        truncate(detail, 80).dimmed()
    )
    .trim_end()
    .to_string()
}

fn describe_resolution(task: &Task) -> String {
    let mark = match task.status {
        TaskStatus::Succeeded => "v".green(),
        TaskStatus::Failed => "x".red(),
        _ => "-".dimmed(),
    };
    format!("{} {} {}", mark, task.id, task.status)
}

fn status_label(status: &TerminalStatus) -> String {
    match status {
        TerminalStatus::GoalAchieved => status.to_string().green().bold().to_string(),
        TerminalStatus::GoalFailed | TerminalStatus::Fatal(_) => {
            status.to_string().red().bold().to_string()
        }
        _ => status.to_string().yellow().bold().to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pentree_domain::{ExecutionLog, RecordDraft, Subtask, VerdictStatus};
    use serde_json::Map;

    #[test]
    fn test_describe_decision() {
        let invoke = Decision::ToolInvocation {
            provider: Some(ProviderId::from("kali")),
            capability: "port_scan".to_string(),
            parameters: Map::new(),
            rationale: None,
        };
        assert_eq!(describe_decision(&invoke), "invoke kali/port_scan");

        let split = Decision::Decomposition {
            subtasks: vec![Subtask::new("scan"), Subtask::new("enumerate")],
            rationale: None,
        };
        assert_eq!(describe_decision(&split), "decompose into 2 subtasks");

        let verdict = Decision::Verdict {
            status: VerdictStatus::Failed,
            rationale: "nothing reachable".to_string(),
        };
        assert_eq!(describe_decision(&verdict), "verdict: failed");
    }

    #[test]
    fn test_describe_record_prefers_summary() {
        colored::control::set_override(false);
        let mut log = ExecutionLog::new();
        let record = log
            .append(
                RecordDraft::new(
                    TaskId::from("t1"),
                    ProviderId::from("kali"),
                    "port_scan",
                    Map::new(),
                    1,
                )
                .succeeded("{}", "2 open ports", 2),
            )
            .clone();

        let line = describe_record(&record);
        assert!(line.contains("kali/port_scan"));
        assert!(line.contains("2 open ports"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
    }
}
