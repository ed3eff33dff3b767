//! Interpretation of raw tool output into a summary and findings.
//!
//! Accepted shapes, tried in order:
//!
//! 1. JSON (output starting with `{` or `[`). Must parse, otherwise the
//!    output is malformed:
//!    - `{"findings": [...], "summary": "..."}` or a bare array of findings,
//!      each `{"kind": "...", <identity fields>, <other fields>}`
//!    - `{"hosts": [{"address": "...", "ports": [{"port": 22, ...}]}]}`
//!    - any other object is summarized without findings
//! 2. Port-scanner text (`22/tcp open ssh`), optionally preceded by a
//!    `Nmap scan report for <host>` line. Only open ports become findings.
//! 3. Anything else is summarized without findings.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::entities::{Finding, FindingKind};
use crate::task::TaskId;

const SUMMARY_LIMIT: usize = 400;

static PORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,5})/(tcp|udp|sctp)\s+(open\|filtered|open|closed|filtered)\s*(\S+)?\s*(.*)$")
        .expect("Hardcoded port line regex should be valid")
});

static REPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)scan report for\s+(?:(\S+)\s+\(([^)]+)\)|(\S+))")
        .expect("Hardcoded report line regex should be valid")
});

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Malformed JSON output: {0}")]
    MalformedJson(String),

    #[error("Invalid finding at index {index}: {reason}")]
    InvalidFinding { index: usize, reason: String },
}

/// Context used to attribute and complete parsed findings.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub task: TaskId,
    /// Engagement or invocation target, used when output omits the host
    pub target: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ParseContext {
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            target: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub summary: String,
    pub findings: Vec<Finding>,
}

pub fn parse_tool_output(raw: &str, ctx: &ParseContext) -> Result<ParsedOutput, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(ParsedOutput {
            summary: "no output".to_string(),
            findings: Vec::new(),
        });
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| ParseError::MalformedJson(e.to_string()))?;
        return parse_json(value, ctx);
    }

    Ok(parse_text(trimmed, ctx))
}

fn parse_json(value: Value, ctx: &ParseContext) -> Result<ParsedOutput, ParseError> {
    match value {
        Value::Array(items) => {
            let findings = findings_from_array(&items, ctx)?;
            Ok(ParsedOutput {
                summary: format!("{} findings reported", findings.len()),
                findings,
            })
        }
        Value::Object(obj) => {
            let mut findings = Vec::new();
            if let Some(items) = obj.get("findings") {
                let Value::Array(items) = items else {
                    return Err(ParseError::MalformedJson(
                        "'findings' must be an array".to_string(),
                    ));
                };
                findings.extend(findings_from_array(items, ctx)?);
            }
            if let Some(hosts) = obj.get("hosts") {
                let Value::Array(hosts) = hosts else {
                    return Err(ParseError::MalformedJson(
                        "'hosts' must be an array".to_string(),
                    ));
                };
                findings.extend(findings_from_hosts(hosts, ctx)?);
            }
            let summary = match obj.get("summary").and_then(Value::as_str) {
                Some(summary) => truncate(summary),
                None if !findings.is_empty() => format!("{} findings reported", findings.len()),
                None => truncate(&Value::Object(obj.clone()).to_string()),
            };
            Ok(ParsedOutput { summary, findings })
        }
        other => Ok(ParsedOutput {
            summary: truncate(&other.to_string()),
            findings: Vec::new(),
        }),
    }
}

fn findings_from_array(items: &[Value], ctx: &ParseContext) -> Result<Vec<Finding>, ParseError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            finding_from_object(item, ctx).map_err(|reason| ParseError::InvalidFinding {
                index,
                reason,
            })
        })
        .collect()
}

fn finding_from_object(item: &Value, ctx: &ParseContext) -> Result<Finding, String> {
    let obj = item.as_object().ok_or("expected an object")?;
    let kind: FindingKind = obj
        .get("kind")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .ok_or("missing 'kind'")?
        .parse()
        .map_err(|e: super::FindingError| e.to_string())?;

    let mut finding = Finding::new(kind, ctx.task.clone()).observed_at(ctx.observed_at);
    let identity_keys = kind.identity_keys();
    for (key, value) in flatten(obj) {
        if key == "kind" || key == "type" {
            continue;
        }
        if identity_keys.contains(&key.as_str()) {
            finding = finding.with_identity(key, scalar_to_string(&value));
        } else {
            finding = finding.with_attribute(key, value);
        }
    }
    if let Some(target) = &ctx.target {
        let host_key = identity_keys[0];
        if (host_key == "host" || host_key == "address") && !finding.identity.contains_key(host_key)
        {
            finding = finding.with_identity(host_key, target.clone());
        }
    }
    finding.normalized().map_err(|e| e.to_string())
}

fn findings_from_hosts(hosts: &[Value], ctx: &ParseContext) -> Result<Vec<Finding>, ParseError> {
    let mut findings = Vec::new();
    for (index, host) in hosts.iter().enumerate() {
        let invalid = |reason: &str| ParseError::InvalidFinding {
            index,
            reason: reason.to_string(),
        };
        let obj = host.as_object().ok_or_else(|| invalid("expected an object"))?;
        let address = obj
            .get("address")
            .or_else(|| obj.get("ip"))
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing 'address'"))?;

        let mut host_finding = Finding::new(FindingKind::Host, ctx.task.clone())
            .observed_at(ctx.observed_at)
            .with_identity("address", address);
        for key in ["hostname", "os", "status"] {
            if let Some(value) = obj.get(key) {
                host_finding = host_finding.with_attribute(key, value.clone());
            }
        }
        findings.push(host_finding);

        let ports = obj
            .get("ports")
            .or_else(|| obj.get("services"))
            .and_then(Value::as_array);
        for port in ports.into_iter().flatten() {
            let port = port.as_object().ok_or_else(|| invalid("port entry must be an object"))?;
            let number = port
                .get("port")
                .map(scalar_to_string)
                .ok_or_else(|| invalid("port entry without 'port'"))?;
            let protocol = port
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or("tcp");
            let mut service = Finding::new(FindingKind::Service, ctx.task.clone())
                .observed_at(ctx.observed_at)
                .with_identity("host", address)
                .with_identity("port", number)
                .with_identity("protocol", protocol);
            for (key, value) in port {
                if !matches!(key.as_str(), "port" | "protocol") {
                    service = service.with_attribute(key.clone(), value.clone());
                }
            }
            findings.push(service);
        }
    }
    findings
        .into_iter()
        .map(|f| f.normalized())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ParseError::InvalidFinding {
            index: 0,
            reason: e.to_string(),
        })
}

fn parse_text(text: &str, ctx: &ParseContext) -> ParsedOutput {
    let mut current_host = ctx.target.clone();
    let mut findings = Vec::new();
    let mut labels = Vec::new();

    for line in text.lines() {
        if let Some(caps) = REPORT_LINE.captures(line) {
            current_host = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(1))
                .map(|m| m.as_str().to_string());
            continue;
        }
        let Some(caps) = PORT_LINE.captures(line) else {
            continue;
        };
        if &caps[3] != "open" {
            continue;
        }
        let Some(host) = current_host.as_deref() else {
            continue;
        };
        let mut finding = Finding::new(FindingKind::Service, ctx.task.clone())
            .observed_at(ctx.observed_at)
            .with_identity("host", host)
            .with_identity("port", &caps[1])
            .with_identity("protocol", &caps[2])
            .with_attribute("state", "open");
        let mut label = format!("{}/{}", &caps[1], &caps[2]);
        if let Some(name) = caps.get(4) {
            finding = finding.with_attribute("name", name.as_str());
            label.push(' ');
            label.push_str(name.as_str());
        }
        let version = caps.get(5).map(|m| m.as_str().trim()).unwrap_or("");
        if !version.is_empty() {
            finding = finding.with_attribute("version", version);
        }
        if let Ok(finding) = finding.normalized() {
            findings.push(finding);
            labels.push(label);
        }
    }

    let summary = if findings.is_empty() {
        truncate(text)
    } else {
        let hosts: Vec<&str> = {
            let mut hosts: Vec<&str> = findings.iter().filter_map(|f| f.host()).collect();
            hosts.dedup();
            hosts
        };
        format!(
            "{} open ports on {}: {}",
            findings.len(),
            hosts.join(", "),
            labels.join(", ")
        )
    };
    ParsedOutput { summary, findings }
}

/// Lifts a nested `"identity"` / `"attributes"` object to the top level.
fn flatten(obj: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, value) in obj {
        match (key.as_str(), value) {
            ("identity" | "attributes", Value::Object(inner)) => {
                out.extend(inner.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            _ => out.push((key.clone(), value.clone())),
        }
    }
    out
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_string();
    }
    let cut: String = text.chars().take(SUMMARY_LIMIT).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ParseContext {
        ParseContext::new(TaskId::new("t2")).with_target("10.0.0.5")
    }

    #[test]
    fn test_port_scanner_text() {
        let raw = "Starting scan\n\
                   Nmap scan report for 10.0.0.5\n\
                   PORT   STATE  SERVICE VERSION\n\
                   22/tcp open   ssh     OpenSSH 8.9p1\n\
                   80/tcp open   http\n\
                   443/tcp closed https\n";
        let parsed = parse_tool_output(raw, &ctx()).unwrap();
        assert_eq!(parsed.findings.len(), 2);
        assert!(parsed.findings.iter().all(|f| f.kind == FindingKind::Service));
        assert_eq!(parsed.findings[0].attribute_str("version"), Some("OpenSSH 8.9p1"));
        assert_eq!(
            parsed.summary,
            "2 open ports on 10.0.0.5: 22/tcp ssh, 80/tcp http"
        );
    }

    #[test]
    fn test_report_line_with_hostname() {
        let raw = "Nmap scan report for web.local (10.0.0.9)\n8080/tcp open http-proxy\n";
        let parsed = parse_tool_output(raw, &ctx()).unwrap();
        assert_eq!(parsed.findings[0].host(), Some("10.0.0.9"));
    }

    #[test]
    fn test_json_findings() {
        let raw = r#"{"summary": "found creds", "findings": [
            {"kind": "credential", "host": "10.0.0.5", "service": "ssh", "username": "root", "password": "toor"},
            {"kind": "vulnerability", "identifier": "CVE-2021-41773", "severity": "critical"}
        ]}"#;
        let parsed = parse_tool_output(raw, &ctx()).unwrap();
        assert_eq!(parsed.summary, "found creds");
        assert_eq!(parsed.findings.len(), 2);
        assert_eq!(parsed.findings[0].attribute_str("password"), Some("toor"));
        // host filled from the target
        assert_eq!(parsed.findings[1].host(), Some("10.0.0.5"));
        assert!(parsed.findings[1].is_unresolved_critical());
    }

    #[test]
    fn test_json_hosts() {
        let raw = r#"{"hosts": [{"address": "10.0.0.7", "os": "Linux",
            "ports": [{"port": 22, "name": "ssh"}, {"port": 53, "protocol": "udp"}]}]}"#;
        let parsed = parse_tool_output(raw, &ctx()).unwrap();
        assert_eq!(parsed.findings.len(), 3);
        assert_eq!(parsed.findings[0].kind, FindingKind::Host);
        assert_eq!(parsed.findings[2].identity["protocol"], "udp");
        assert_eq!(parsed.findings[1].identity["port"], "22");
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let err = parse_tool_output("{\"findings\": [", &ctx()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedJson(_)));
    }

    #[test]
    fn test_invalid_finding_is_an_error() {
        let err = parse_tool_output(r#"[{"kind": "printer"}]"#, &ctx()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFinding { index: 0, .. }));
    }

    #[test]
    fn test_plain_text_is_summarized() {
        let parsed = parse_tool_output("whois: no match", &ctx()).unwrap();
        assert!(parsed.findings.is_empty());
        assert_eq!(parsed.summary, "whois: no match");
    }

    #[test]
    fn test_long_text_is_truncated() {
        let parsed = parse_tool_output(&"a".repeat(1000), &ctx()).unwrap();
        assert!(parsed.summary.ends_with("..."));
        assert_eq!(parsed.summary.chars().count(), SUMMARY_LIMIT + 3);
    }
}
