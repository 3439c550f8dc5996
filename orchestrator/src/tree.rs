use serde::{Deserialize, Serialize};

/// Execution state of a single plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanNodeStatus {
    Pending,
    Running,
    Blocked,
    Completed,
    Failed,
}

impl PlanNodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanNodeStatus::Pending => "pending",
            PlanNodeStatus::Running => "running",
            PlanNodeStatus::Blocked => "blocked",
            PlanNodeStatus::Completed => "completed",
            PlanNodeStatus::Failed => "failed",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            PlanNodeStatus::Pending => "○",
            PlanNodeStatus::Running => "▶",
            PlanNodeStatus::Blocked => "⚠",
            PlanNodeStatus::Completed => "✓",
            PlanNodeStatus::Failed => "✗",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanNodeStatus::Completed | PlanNodeStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Lenient parse used by the contract parser; unknown values fall back to `Low`.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Test,
    Lint,
    Build,
    Manual,
    VmScreenshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationResult {
    Pass,
    Fail,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanVerification {
    #[serde(rename = "type")]
    pub kind: VerificationType,
    pub result: VerificationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A tool invocation recorded against a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub timestamp: i64,
}

/// One task unit of the hierarchical plan. A node exclusively owns its children.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: PlanNodeStatus,
    pub assignee: String,
    #[serde(default)]
    pub children: Vec<PlanNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub is_parallel: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<PlanVerification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
}

impl PlanNode {
    /// Create a childless node with every optional field unset.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        assignee: impl Into<String>,
        status: PlanNodeStatus,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status,
            assignee: assignee.into(),
            children: Vec::new(),
            risk_level: None,
            priority: None,
            estimated_ms: None,
            actual_ms: None,
            started_at: None,
            blocked_by: Vec::new(),
            blocks: Vec::new(),
            is_parallel: false,
            tools_used: Vec::new(),
            verification: None,
            reasoning: None,
            output_summary: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
