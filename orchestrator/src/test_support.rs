//! Test-only builders for plan trees, agent outputs and a scripted LLM.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::aggregate::aggregate_status;
use crate::core::evidence::{Evidence, EvidencePayload, EvidenceVerdict, MetricData};
use crate::core::types::{AgentAction, RepoAction};
use crate::io::init::{InitOptions, OrchestratorPaths, init_orchestrator};
use crate::io::llm::LlmClient;
use crate::tree::{PlanNode, PlanNodeStatus};

/// A leaf assigned to `swe` with a deterministic title.
pub fn leaf(id: &str, status: PlanNodeStatus) -> PlanNode {
    PlanNode::new(id, format!("{id} title"), "swe", status)
}

/// A `ceo` node whose status is aggregated from `children`.
pub fn node_with_children(id: &str, children: Vec<PlanNode>) -> PlanNode {
    let status = aggregate_status(&children);
    PlanNode {
        children,
        ..PlanNode::new(id, format!("{id} title"), "ceo", status)
    }
}

/// A `pending` composite, for search-order tests where aggregation would
/// make the parent itself the bottleneck.
pub fn pending_group(id: &str, children: Vec<PlanNode>) -> PlanNode {
    PlanNode {
        children,
        ..PlanNode::new(id, format!("{id} title"), "ceo", PlanNodeStatus::Pending)
    }
}

pub fn evidence(id: &str, timestamp: i64) -> Evidence {
    Evidence {
        id: id.to_string(),
        title: format!("{id} title"),
        timestamp,
        related_node_id: None,
        related_agent_id: "swe".to_string(),
        summary: format!("{id} summary"),
        verdict: EvidenceVerdict::Pass,
        payload: EvidencePayload::Metric(MetricData {
            name: "coverage".to_string(),
            value: 80.0,
            unit: "%".to_string(),
            change: None,
            threshold: None,
        }),
    }
}

pub fn action(kind: &str, detail: &str, code_diff: Option<&str>) -> AgentAction {
    AgentAction {
        kind: kind.to_string(),
        title: detail.to_string(),
        detail: detail.to_string(),
        files: None,
        code_diff: code_diff.map(str::to_string),
    }
}

pub fn repo_command(command: &str) -> RepoAction {
    RepoAction {
        kind: RepoAction::RUN_COMMAND.to_string(),
        params: [("command".to_string(), command.to_string())].into(),
    }
}

pub fn repo_merge() -> RepoAction {
    RepoAction {
        kind: RepoAction::MERGE.to_string(),
        params: Default::default(),
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
    Delayed(Duration, String),
}

/// LLM stand-in that answers by substring match on the prompt.
///
/// Rules are checked in insertion order; a prompt no rule matches is an error.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: &str, text: &str) -> Self {
        self.rules
            .push((needle.to_string(), Reply::Text(text.to_string())));
        self
    }

    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn delayed(mut self, needle: &str, delay: Duration, text: &str) -> Self {
        self.rules
            .push((needle.to_string(), Reply::Delayed(delay, text.to_string())));
        self
    }

    /// Every prompt received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn reply_for(&self, prompt: &str) -> Option<Reply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

impl LlmClient for ScriptedLlm {
    async fn call(&self, prompt: &str, _timeout: Duration) -> Result<String> {
        match self.reply_for(prompt) {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(anyhow!(message)),
            Some(Reply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(anyhow!("no scripted reply for prompt")),
        }
    }
}

/// A temp project root with `.orchestrator/` initialized.
pub struct TestWorkspace {
    _dir: TempDir,
    pub paths: OrchestratorPaths,
}

impl TestWorkspace {
    pub fn new(goal: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = init_orchestrator(
            dir.path(),
            &InitOptions {
                goal: goal.to_string(),
                ..InitOptions::default()
            },
        )?;
        Ok(Self { _dir: dir, paths })
    }
}
