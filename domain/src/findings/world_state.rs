//! World state: the deduplicated set of findings of one engagement.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use super::entities::{Finding, FindingError, FindingKey, FindingKind};

/// Default number of findings in a bounded view.
pub const DEFAULT_VIEW_LIMIT: usize = 50;

/// Result of merging one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// Known finding; `changed` is false when nothing new was learned.
    Updated { changed: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Restricts a [`WorldState::view`].
#[derive(Debug, Clone, PartialEq)]
pub struct ViewFilter {
    pub kinds: Option<Vec<FindingKind>>,
    pub host: Option<String>,
    pub limit: usize,
}

impl Default for ViewFilter {
    fn default() -> Self {
        Self {
            kinds: None,
            host: None,
            limit: DEFAULT_VIEW_LIMIT,
        }
    }
}

impl ViewFilter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: FindingKind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().trim().to_lowercase());
        self
    }

    fn matches(&self, finding: &Finding) -> bool {
        let kind_ok = self
            .kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&finding.kind));
        let host_ok = self
            .host
            .as_deref()
            .is_none_or(|host| finding.host() == Some(host));
        kind_ok && host_ok
    }
}

/// Read-only, bounded projection of the world state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldView {
    pub findings: Vec<Finding>,
    /// Matching findings left out because of the limit
    pub omitted: usize,
    /// `host -> ["22/tcp ssh", ...]` over the open services in `findings`
    pub open_services: BTreeMap<String, Vec<String>>,
}

impl WorldView {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Plain-text rendering for prompts and summaries.
    pub fn render(&self) -> String {
        if self.findings.is_empty() {
            return "No findings yet.".to_string();
        }
        let mut out = String::new();
        for finding in &self.findings {
            out.push_str("- ");
            out.push_str(&finding.describe());
            out.push('\n');
        }
        if self.omitted > 0 {
            out.push_str(&format!("({} more findings omitted)\n", self.omitted));
        }
        if !self.open_services.is_empty() {
            out.push_str("Open services:\n");
            for (host, services) in &self.open_services {
                out.push_str(&format!("  {}: {}\n", host, services.join(", ")));
            }
        }
        out
    }
}

/// Deduplicated findings keyed on (kind, identity attributes).
///
/// Merging is idempotent: re-discovering a finding refreshes its
/// non-identity attributes and `last_seen`, and never creates a duplicate.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    entries: BTreeMap<FindingKey, Finding>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.entries.values()
    }

    pub fn get(&self, key: &FindingKey) -> Option<&Finding> {
        self.entries.get(key)
    }

    pub fn merge(&mut self, finding: Finding) -> Result<MergeOutcome, FindingError> {
        let finding = finding.normalized()?;
        Ok(self.merge_normalized(finding))
    }

    /// Merges a batch atomically: if any finding is invalid, nothing is merged.
    pub fn merge_all(
        &mut self,
        findings: impl IntoIterator<Item = Finding>,
    ) -> Result<MergeSummary, FindingError> {
        let normalized = findings
            .into_iter()
            .map(Finding::normalized)
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = MergeSummary::default();
        for finding in normalized {
            match self.merge_normalized(finding) {
                MergeOutcome::Inserted => summary.inserted += 1,
                MergeOutcome::Updated { .. } => summary.updated += 1,
            }
        }
        Ok(summary)
    }

    fn merge_normalized(&mut self, finding: Finding) -> MergeOutcome {
        let key = finding.key();
        match self.entries.get_mut(&key) {
            Some(existing) => {
                let mut changed = false;
                for (k, v) in finding.attributes {
                    if existing.attributes.get(&k) != Some(&v) {
                        existing.attributes.insert(k, v);
                        changed = true;
                    }
                }
                if finding.last_seen > existing.last_seen {
                    existing.last_seen = finding.last_seen;
                }
                MergeOutcome::Updated { changed }
            }
            None => {
                self.entries.insert(key, finding);
                MergeOutcome::Inserted
            }
        }
    }

    /// Open services on `host` (state other than closed/filtered).
    pub fn open_services<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        let host = host.trim().to_lowercase();
        self.entries
            .values()
            .filter(move |f| f.kind == FindingKind::Service && f.host() == Some(host.as_str()))
            .filter(|f| is_open(f))
    }

    /// Sessions not marked inactive.
    pub fn active_sessions(&self) -> impl Iterator<Item = &Finding> {
        self.entries.values().filter(|f| {
            f.kind == FindingKind::Session
                && f.attributes
                    .get("active")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true)
        })
    }

    pub fn unresolved_critical(&self) -> impl Iterator<Item = &Finding> {
        self.entries.values().filter(|f| f.is_unresolved_critical())
    }

    /// Bounded view ordered by relevance: unresolved critical findings,
    /// then sessions, credentials, services and hosts, most recent first.
    pub fn view(&self, filter: &ViewFilter) -> WorldView {
        let mut matching: Vec<&Finding> =
            self.entries.values().filter(|f| filter.matches(f)).collect();

        matching.sort_by(|a, b| {
            b.is_unresolved_critical()
                .cmp(&a.is_unresolved_critical())
                .then_with(|| b.kind.relevance().cmp(&a.kind.relevance()))
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        let omitted = matching.len().saturating_sub(filter.limit);
        matching.truncate(filter.limit);

        let mut open_services: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for finding in matching
            .iter()
            .filter(|f| f.kind == FindingKind::Service && is_open(f))
        {
            if let Some(host) = finding.host() {
                let port = finding.identity.get("port").map(String::as_str).unwrap_or("?");
                let proto = finding
                    .identity
                    .get("protocol")
                    .map(String::as_str)
                    .unwrap_or("?");
                let mut label = format!("{}/{}", port, proto);
                if let Some(name) = finding.attribute_str("name") {
                    label.push(' ');
                    label.push_str(name);
                }
                open_services.entry(host.to_string()).or_default().push(label);
            }
        }

        WorldView {
            findings: matching.into_iter().cloned().collect(),
            omitted,
            open_services,
        }
    }
}

impl Serialize for WorldState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

fn is_open(finding: &Finding) -> bool {
    !matches!(
        finding.attribute_str("state"),
        Some("closed") | Some("filtered")
    )
}
