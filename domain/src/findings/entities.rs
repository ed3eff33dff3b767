//! Findings: typed facts discovered during an engagement.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::task::TaskId;

/// Category of a finding. Each kind has a fixed set of identity attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Host,
    Service,
    Credential,
    Session,
    Vulnerability,
}

impl FindingKind {
    pub const ALL: [FindingKind; 5] = [
        FindingKind::Host,
        FindingKind::Service,
        FindingKind::Credential,
        FindingKind::Session,
        FindingKind::Vulnerability,
    ];

    /// Attributes that together identify one finding of this kind.
    pub fn identity_keys(&self) -> &'static [&'static str] {
        match self {
            FindingKind::Host => &["address"],
            FindingKind::Service => &["host", "port", "protocol"],
            FindingKind::Credential => &["host", "service", "username"],
            FindingKind::Session => &["host", "session_id"],
            FindingKind::Vulnerability => &["host", "identifier"],
        }
    }

    /// Relevance when building bounded views (higher first).
    pub fn relevance(&self) -> u8 {
        match self {
            FindingKind::Vulnerability => 5,
            FindingKind::Session => 4,
            FindingKind::Credential => 3,
            FindingKind::Service => 2,
            FindingKind::Host => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Host => "host",
            FindingKind::Service => "service",
            FindingKind::Credential => "credential",
            FindingKind::Session => "session",
            FindingKind::Vulnerability => "vulnerability",
        }
    }
}

impl FromStr for FindingKind {
    type Err = FindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "host" => Ok(FindingKind::Host),
            "service" | "port" => Ok(FindingKind::Service),
            "credential" | "credentials" => Ok(FindingKind::Credential),
            "session" => Ok(FindingKind::Session),
            "vulnerability" | "vuln" => Ok(FindingKind::Vulnerability),
            other => Err(FindingError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FindingError {
    #[error("Unknown finding kind: {0}")]
    UnknownKind(String),

    #[error("{kind} finding is missing identity attribute '{key}'")]
    MissingIdentity { kind: FindingKind, key: &'static str },
}

/// Uniqueness key of a finding: kind plus its identity attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FindingKey {
    pub kind: FindingKind,
    pub identity: BTreeMap<String, String>,
}

impl std::fmt::Display for FindingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .identity
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}[{}]", self.kind, parts.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub identity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    pub discovered_by: TaskId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Finding {
    pub fn new(kind: FindingKind, discovered_by: TaskId) -> Self {
        let now = Utc::now();
        Self {
            kind,
            identity: BTreeMap::new(),
            attributes: Map::new(),
            discovered_by,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn with_identity(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.identity.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.first_seen = at;
        self.last_seen = at;
        self
    }

    /// Splits identity from other attributes, normalizes values and checks
    /// that every identity key of the kind is present.
    ///
    /// Identity entries that are not part of the kind's key move to
    /// `attributes`.
    pub fn normalized(mut self) -> Result<Self, FindingError> {
        let keys = self.kind.identity_keys();
        let mut identity = BTreeMap::new();
        for (key, value) in std::mem::take(&mut self.identity) {
            if keys.contains(&key.as_str()) {
                let value = normalize_identity_value(&key, &value);
                identity.insert(key, value);
            } else {
                self.attributes.insert(key, Value::String(value));
            }
        }
        for key in keys {
            if identity.get(*key).is_none_or(|v| v.is_empty()) {
                return Err(FindingError::MissingIdentity {
                    kind: self.kind,
                    key,
                });
            }
        }
        self.identity = identity;
        Ok(self)
    }

    pub fn key(&self) -> FindingKey {
        FindingKey {
            kind: self.kind,
            identity: self.identity.clone(),
        }
    }

    /// Host this finding is about, if any.
    pub fn host(&self) -> Option<&str> {
        self.identity
            .get("host")
            .or_else(|| self.identity.get("address"))
            .map(String::as_str)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Critical vulnerability not marked resolved.
    pub fn is_unresolved_critical(&self) -> bool {
        self.kind == FindingKind::Vulnerability
            && self
                .attribute_str("severity")
                .is_some_and(|s| s.eq_ignore_ascii_case("critical"))
            && !self
                .attributes
                .get("resolved")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// One-line rendering, e.g. `service 10.0.0.5 22/tcp (ssh)`.
    pub fn describe(&self) -> String {
        let id = |k: &str| self.identity.get(k).map(String::as_str).unwrap_or("?");
        let base = match self.kind {
            FindingKind::Host => format!("host {}", id("address")),
            FindingKind::Service => {
                format!("service {} {}/{}", id("host"), id("port"), id("protocol"))
            }
            FindingKind::Credential => format!(
                "credential {}@{} ({})",
                id("username"),
                id("host"),
                id("service")
            ),
            FindingKind::Session => format!("session {} on {}", id("session_id"), id("host")),
            FindingKind::Vulnerability => {
                format!("vulnerability {} on {}", id("identifier"), id("host"))
            }
        };
        let detail = ["name", "service", "severity", "version", "state"]
            .iter()
            .filter_map(|k| self.attribute_str(k))
            .collect::<Vec<_>>();
        if detail.is_empty() {
            base
        } else {
            format!("{} ({})", base, detail.join(", "))
        }
    }
}

fn normalize_identity_value(key: &str, value: &str) -> String {
    match key {
        "host" | "address" | "protocol" | "service" => value.trim().to_lowercase(),
        _ => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_moves_extra_identity_to_attributes() {
        let finding = Finding::new(FindingKind::Service, TaskId::new("t1"))
            .with_identity("host", " 10.0.0.5 ")
            .with_identity("port", "22")
            .with_identity("protocol", "TCP")
            .with_identity("name", "ssh")
            .normalized()
            .unwrap();

        assert_eq!(finding.identity.len(), 3);
        assert_eq!(finding.identity["host"], "10.0.0.5");
        assert_eq!(finding.identity["protocol"], "tcp");
        assert_eq!(finding.attribute_str("name"), Some("ssh"));
    }

    #[test]
    fn test_normalized_requires_identity() {
        let err = Finding::new(FindingKind::Credential, TaskId::new("t1"))
            .with_identity("host", "10.0.0.5")
            .with_identity("username", "admin")
            .normalized()
            .unwrap_err();
        assert_eq!(
            err,
            FindingError::MissingIdentity {
                kind: FindingKind::Credential,
                key: "service"
            }
        );
    }

    #[test]
    fn test_unresolved_critical() {
        let vuln = Finding::new(FindingKind::Vulnerability, TaskId::new("t1"))
            .with_identity("host", "10.0.0.5")
            .with_identity("identifier", "CVE-2021-44228")
            .with_attribute("severity", "Critical");
        assert!(vuln.is_unresolved_critical());
        assert!(!vuln.with_attribute("resolved", true).is_unresolved_critical());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Vuln".parse::<FindingKind>().unwrap(), FindingKind::Vulnerability);
        assert!("printer".parse::<FindingKind>().is_err());
    }

    #[test]
    fn test_describe() {
        let finding = Finding::new(FindingKind::Service, TaskId::new("t2"))
            .with_identity("host", "10.0.0.5")
            .with_identity("port", "22")
            .with_identity("protocol", "tcp")
            .with_attribute("name", "ssh");
        assert_eq!(finding.describe(), "service 10.0.0.5 22/tcp (ssh)");
    }
}
