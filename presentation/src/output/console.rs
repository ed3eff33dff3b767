//! Console output formatter for engagement reports

use colored::Colorize;
use pentree_application::{EngagementReport, TerminalStatus};
use pentree_domain::ExecutionRecord;

/// Formats engagement reports for console display
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// Format the complete engagement report
    pub fn format(report: &EngagementReport) -> String {
        let mut output = String::new();

        output.push_str(&Self::header("Engagement Report"));
        output.push('\n');

        output.push_str(&format!("{} {}\n", "Goal:".cyan().bold(), report.goal));
        if let Some(target) = &report.target {
            output.push_str(&format!("{} {}\n", "Target:".cyan().bold(), target));
        }
        output.push_str(&format!(
            "{} {}\n",
            "Status:".cyan().bold(),
            Self::status(&report.status)
        ));
        let elapsed = report.finished_at - report.started_at;
        output.push_str(&format!(
            "{} {} iterations, {} fallback decisions, {} invocations, {:.1}s\n",
            "Run:".cyan().bold(),
            report.iterations,
            report.fallbacks,
            report.records.len(),
            elapsed.num_milliseconds() as f64 / 1000.0
        ));

        let stats = &report.statistics;
        output.push_str(&Self::section_header("Task Tree"));
        output.push_str(&format!(
            "{} tasks ({} succeeded, {} failed, {} skipped, {} open), depth {}\n\n",
            stats.total,
            stats.succeeded,
            stats.failed,
            stats.skipped,
            stats.pending + stats.in_progress,
            stats.max_depth
        ));
        output.push_str(&report.tree.render_outline());

        output.push_str(&Self::section_header("Findings"));
        if report.findings.is_empty() {
            output.push_str(&format!("{}\n", "No findings recorded.".dimmed()));
        } else {
            let mut findings: Vec<_> = report.findings.findings().collect();
            findings.sort_by(|a, b| {
                b.kind
                    .relevance()
                    .cmp(&a.kind.relevance())
                    .then_with(|| a.first_seen.cmp(&b.first_seen))
            });
            for finding in findings {
                let line = finding.describe();
                if finding.is_unresolved_critical() {
                    output.push_str(&format!("  * {}\n", line.red().bold()));
                } else {
                    output.push_str(&format!("  * {}\n", line));
                }
            }
        }

        output.push_str(&Self::footer());

        output
    }

    /// Format only the task tree outline
    pub fn format_tree(report: &EngagementReport) -> String {
        let mut output = format!(
            "{} {}\n\n",
            "=== Task Tree ===".cyan().bold(),
            Self::status(&report.status)
        );
        output.push_str(&report.tree.render_outline());
        output
    }

    /// Format as JSON
    pub fn format_json(report: &EngagementReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format records read back from an execution log
    pub fn format_records(records: &[ExecutionRecord]) -> String {
        let mut output = Self::section_header(&format!("Execution Log ({} records)", records.len()));
        for record in records {
            let outcome = if record.outcome.is_success() {
                record.outcome.to_string().green()
            } else {
                record.outcome.to_string().red()
            };
            output.push_str(&format!(
                "{:>4} {} {} {}/{} #{} {} {}ms\n",
                record.seq,
                record.timestamp.format("%H:%M:%S"),
                record.task_id,
                record.provider_id,
                record.capability,
                record.attempt,
                outcome,
                record.duration_ms
            ));
            if let Some(text) = record.summary.as_deref().or(record.error.as_deref()) {
                output.push_str(&format!("{}\n", Self::indent(text, "       ").dimmed()));
            }
        }
        output
    }

    fn status(status: &TerminalStatus) -> String {
        match status {
            TerminalStatus::GoalAchieved => status.to_string().green().bold().to_string(),
            TerminalStatus::GoalFailed | TerminalStatus::Fatal(_) => {
                status.to_string().red().bold().to_string()
            }
            _ => status.to_string().yellow().bold().to_string(),
        }
    }

    fn header(title: &str) -> String {
        let line = "=".repeat(60);
        format!("{}\n{:^60}\n{}", line.cyan(), title.bold(), line.cyan())
    }

    fn section_header(title: &str) -> String {
        format!("\n{}\n{}\n", title.cyan().bold(), "-".repeat(40))
    }

    fn footer() -> String {
        format!("\n{}\n", "=".repeat(60).cyan())
    }

    /// Indent a multi-line string
    pub fn indent(text: &str, prefix: &str) -> String {
        text.lines()
            .map(|line| format!("{}{}", prefix, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
