//! Immutable evidence artifacts and the append-only log that holds them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceVerdict {
    Pass,
    Fail,
    Warning,
    Info,
}

impl EvidenceVerdict {
    pub fn glyph(self) -> &'static str {
        match self {
            EvidenceVerdict::Pass => "✓",
            EvidenceVerdict::Fail => "✗",
            EvidenceVerdict::Warning => "⚠",
            EvidenceVerdict::Info => "ℹ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Milliseconds.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TestFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLog {
    pub success: bool,
    pub errors: u32,
    pub warnings: u32,
    pub output: String,
    pub duration: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub file: String,
    pub line: u32,
    pub message: String,
    pub severity: LintSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub errors: u32,
    pub warnings: u32,
    #[serde(default)]
    pub issues: Vec<LintIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffData {
    pub path: String,
    pub added: u32,
    pub removed: u32,
    pub patch: String,
}

impl DiffData {
    /// Count added/removed lines of a unified diff, ignoring file headers.
    pub fn from_patch(path: impl Into<String>, patch: &str) -> Self {
        let mut added = 0;
        let mut removed = 0;
        for line in patch.lines() {
            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            }
            if line.starts_with('+') {
                added += 1;
            } else if line.starts_with('-') {
                removed += 1;
            }
        }
        Self {
            path: path.into(),
            added,
            removed,
            patch: patch.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub value: f64,
    pub unit: String,
    /// Percentage change from the previous sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// Evidence payload, keyed by the evidence type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EvidencePayload {
    TestResult(TestResult),
    BuildLog(BuildLog),
    LintReport(LintReport),
    Screenshot(Screenshot),
    Diff(DiffData),
    Terminal(TerminalOutput),
    ApiResponse(Map<String, Value>),
    Metric(MetricData),
}

impl EvidencePayload {
    pub fn type_tag(&self) -> &'static str {
        match self {
            EvidencePayload::TestResult(_) => "test_result",
            EvidencePayload::BuildLog(_) => "build_log",
            EvidencePayload::LintReport(_) => "lint_report",
            EvidencePayload::Screenshot(_) => "screenshot",
            EvidencePayload::Diff(_) => "diff",
            EvidencePayload::Terminal(_) => "terminal",
            EvidencePayload::ApiResponse(_) => "api_response",
            EvidencePayload::Metric(_) => "metric",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    pub title: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_node_id: Option<String>,
    pub related_agent_id: String,
    pub summary: String,
    pub verdict: EvidenceVerdict,
    #[serde(flatten)]
    pub payload: EvidencePayload,
}

/// Append-only evidence store. Entries are never edited, only appended and pruned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceLog {
    entries: Vec<Evidence>,
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, evidence: Evidence) {
        self.entries.push(evidence);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest-first by timestamp; ties keep the later append first.
    pub fn recent(&self, limit: usize) -> Vec<&Evidence> {
        self.newest_first().into_iter().take(limit).collect()
    }

    /// Newest-first page of entries.
    pub fn page(&self, offset: usize, limit: usize) -> Vec<&Evidence> {
        self.newest_first()
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect()
    }

    /// Keep only the `max` newest entries. Returns how many were removed.
    pub fn prune(&mut self, max: usize) -> usize {
        if self.entries.len() <= max {
            return 0;
        }
        let keep: Vec<String> = self
            .recent(max)
            .iter()
            .map(|evidence| evidence.id.clone())
            .collect();
        let before = self.entries.len();
        self.entries.retain(|evidence| keep.contains(&evidence.id));
        before - self.entries.len()
    }

    fn newest_first(&self) -> Vec<&Evidence> {
        let mut sorted: Vec<(usize, &Evidence)> = self.entries.iter().enumerate().collect();
        sorted.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        sorted.into_iter().map(|(_, evidence)| evidence).collect()
    }
}
