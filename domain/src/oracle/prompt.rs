//! Prompt templates for the decision oracle

use super::request::{OracleRequest, TaskSummary};

/// Templates for oracle prompts
pub struct OraclePromptTemplate;

impl OraclePromptTemplate {
    pub fn system() -> &'static str {
        r#"You are the planning component of an authorized security assessment.
You work on one task of a task tree at a time and answer with exactly one JSON object
choosing one action:

1. Invoke a tool capability from the catalog:
```json
{"action": "tool_invocation", "provider": "<provider>", "capability": "<name>",
 "parameters": {"<param>": "<value>"}, "rationale": "<why>"}
```

2. Split the task into smaller subtasks (only when decomposition is allowed):
```json
{"action": "decomposition", "subtasks": [{"goal": "<subtask>", "priority": 1-10}],
 "rationale": "<why>"}
```

3. Conclude the task:
```json
{"action": "verdict", "status": "succeeded" | "failed", "rationale": "<why>"}
```

Rules:
- Only use capabilities listed in the catalog, with all required parameters.
- Prefer reconnaissance before enumeration, and enumeration before attacks.
- Give a verdict once the task's goal is met or clearly cannot be met.
- Answer with the JSON object only."#
    }

    pub fn decision(request: &OracleRequest) -> String {
        let task = &request.task;
        let mut out = String::new();

        out.push_str(&format!("## Engagement\n{}\n", request.engagement_goal));
        if let Some(target) = &request.target {
            out.push_str(&format!("Target: {}\n", target));
        }

        out.push_str("\n## Task tree\n");
        out.push_str(&request.tree_outline);

        if !request.ancestors.is_empty() {
            out.push_str("\n## Parent chain\n");
            for ancestor in &request.ancestors {
                out.push_str(&format!("- {}\n", summary_line(ancestor)));
            }
        }

        out.push_str(&format!(
            "\n## Current task\n{} (depth {}): {}\n",
            task.id, task.depth, task.goal
        ));
        if let Some(rationale) = &task.rationale {
            out.push_str(&format!("Rationale: {}\n", rationale));
        }
        if task.is_review() {
            out.push_str("\nAll subtasks of this task have finished:\n");
            for child in &task.children {
                out.push_str(&format!("- {}\n", summary_line(child)));
            }
            out.push_str("Decide whether the task is now achieved.\n");
        }
        if !task.attempts.is_empty() {
            out.push_str("\nEarlier attempts for this task:\n");
            for attempt in &task.attempts {
                out.push_str(&format!("- {}\n", attempt));
            }
        }
        if !task.can_decompose {
            out.push_str("\nDecomposition is NOT allowed for this task.\n");
        }

        out.push_str("\n## Known findings\n");
        out.push_str(&request.world.render());

        out.push_str("\n## Capability catalog\n");
        if request.catalog.is_empty() {
            out.push_str("(no capabilities available)\n");
        }
        for capability in &request.catalog {
            out.push_str(&format!("- {}\n", capability.describe()));
        }

        out.push_str("\nRespond with exactly one JSON decision.\n");
        out
    }
}

fn summary_line(task: &TaskSummary) -> String {
    match &task.outcome {
        Some(outcome) => format!("[{}] {} {} -- {}", task.status, task.id, task.goal, outcome),
        None => format!("[{}] {} {}", task.status, task.id, task.goal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::WorldView;
    use crate::oracle::request::TaskContext;
    use crate::task::{TaskId, TaskStatus};
    use crate::tool::ToolCapability;

    fn request(can_decompose: bool, children: Vec<TaskSummary>) -> OracleRequest {
        OracleRequest {
            engagement_goal: "enumerate services on 10.0.0.5".into(),
            target: Some("10.0.0.5".into()),
            task: TaskContext {
                id: TaskId::new("t1"),
                goal: "enumerate services on 10.0.0.5".into(),
                depth: 1,
                rationale: None,
                can_decompose,
                children,
                attempts: Vec::new(),
            },
            ancestors: Vec::new(),
            world: WorldView::default(),
            catalog: vec![ToolCapability::new("nmap", "port_scan", "TCP scan")],
            tree_outline: "[ ] t1 enumerate services on 10.0.0.5\n".into(),
        }
    }

    #[test]
    fn test_decision_prompt_contents() {
        let prompt = OraclePromptTemplate::decision(&request(true, Vec::new()));
        assert!(prompt.contains("Target: 10.0.0.5"));
        assert!(prompt.contains("nmap/port_scan [reconnaissance]"));
        assert!(prompt.contains("No findings yet."));
        assert!(!prompt.contains("NOT allowed"));
    }

    #[test]
    fn test_review_prompt_lists_children() {
        let children = vec![TaskSummary {
            id: TaskId::new("t2"),
            goal: "run port scan".into(),
            status: TaskStatus::Succeeded,
            outcome: Some("2 open ports".into()),
        }];
        let prompt = OraclePromptTemplate::decision(&request(false, children));
        assert!(prompt.contains("[succeeded] t2 run port scan -- 2 open ports"));
        assert!(prompt.contains("Decomposition is NOT allowed"));
    }

    #[test]
    fn test_system_prompt_mentions_all_actions() {
        let system = OraclePromptTemplate::system();
        for action in ["tool_invocation", "decomposition", "verdict"] {
            assert!(system.contains(action));
        }
    }
}
