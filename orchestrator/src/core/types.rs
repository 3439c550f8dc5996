//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tree::RiskLevel;

/// One high-leverage item proposed by the planning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageItem {
    pub title: String,
    pub assignee: String,
    #[serde(default)]
    pub why: String,
    #[serde(default)]
    pub risk: RiskLevel,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
}

/// A directive proposed by the planning step, before norms sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedBroadcast {
    pub to: String,
    pub message: String,
    pub expires_mins: f64,
}

/// Validated output of the planning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeoLlmOutput {
    pub cycle_summary: String,
    pub top_leverage: Vec<LeverageItem>,
    pub broadcasts: Vec<ProposedBroadcast>,
    #[serde(default)]
    pub needs_external_data: bool,
}

/// Agent-declared progress for its assigned work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentReportStatus {
    Completed,
    InProgress,
    Blocked,
}

impl AgentReportStatus {
    /// Unrecognized values are treated as `completed`.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim() {
            "in_progress" => AgentReportStatus::InProgress,
            "blocked" => AgentReportStatus::Blocked,
            _ => AgentReportStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_diff: Option<String>,
}

/// An action against the external repository (merge, shell command, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl RepoAction {
    pub const MERGE: &'static str = "merge_pr";
    pub const RUN_COMMAND: &'static str = "run_bash";

    pub fn command(&self) -> Option<&str> {
        if self.kind != Self::RUN_COMMAND {
            return None;
        }
        self.params.get("command").map(String::as_str)
    }
}

/// Validated output of one agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub actions: Vec<AgentAction>,
    pub status: AgentReportStatus,
    pub output: String,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub repo_actions: Vec<RepoAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Running,
    Completed,
    Failed,
}

/// One entry of the append-only cycle history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRun {
    pub id: String,
    pub status: CycleStatus,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CeoLlmOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunState {
    #[default]
    Idle,
    Running,
    Completed,
    Blocked,
    Failed,
}

impl AgentRunState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRunState::Idle => "idle",
            AgentRunState::Running => "running",
            AgentRunState::Completed => "completed",
            AgentRunState::Blocked => "blocked",
            AgentRunState::Failed => "failed",
        }
    }
}

/// Latest known state of one worker agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusEntry {
    pub status: AgentRunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
    #[serde(default)]
    pub updated_at: i64,
}

/// The locked problem frame a cycle works against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Frame {
    pub locked: bool,
    pub goal: String,
    pub constraints: String,
    pub verification: String,
}

/// Cumulative counters feeding the autonomy score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CycleMetrics {
    pub completed_tasks: u32,
    pub total_tasks: u32,
    pub interventions: u32,
    pub violations: u32,
    pub rework: u32,
}
