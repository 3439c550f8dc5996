//! Observe-context digest for the planning prompt.
//!
//! The builder reads the plan tree, evidence log, agent statuses, cycle
//! history and broadcast board and condenses them into bounded text blocks.
//! Each block is rendered separately so the prompt layer can budget them
//! individually; the cycle history block is always present because it carries
//! the instruction not to repeat earlier directives.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::core::aggregate::{calculate_progress, count_nodes};
use crate::core::broadcast::BroadcastBoard;
use crate::core::evidence::EvidenceLog;
use crate::core::selector::{find_bottlenecks, node_path};
use crate::core::text::{compact_text, truncate_chars};
use crate::core::types::{AgentStatusEntry, CycleRun, CycleStatus};
use crate::tree::PlanNode;

pub const NO_REPEAT_INSTRUCTION: &str =
    "Do not repeat directives from these cycles; build on their results or choose a different lever.";

/// Caps applied to every digest block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub bottlenecks: usize,
    pub evidence: usize,
    pub agents: usize,
    pub completed_runs: usize,
    pub task_chars: usize,
    pub output_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            bottlenecks: 5,
            evidence: 10,
            agents: 10,
            completed_runs: 3,
            task_chars: 80,
            output_chars: 120,
        }
    }
}

/// Read-only view of orchestrator state at observe time.
#[derive(Debug, Clone, Copy)]
pub struct ObserveSnapshot<'a> {
    pub plan: Option<&'a PlanNode>,
    pub evidence: &'a EvidenceLog,
    pub agent_statuses: &'a BTreeMap<String, AgentStatusEntry>,
    pub cycle_runs: &'a [CycleRun],
    pub broadcasts: &'a BroadcastBoard,
    pub now_ms: i64,
}

/// Rendered digest blocks, one per concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleContext {
    pub plan: String,
    pub evidence: String,
    pub agents: String,
    pub history: String,
    pub broadcasts: String,
}

impl CycleContext {
    /// All blocks joined in prompt order.
    pub fn render(&self) -> String {
        [
            &self.plan,
            &self.evidence,
            &self.agents,
            &self.history,
            &self.broadcasts,
        ]
        .iter()
        .map(|block| block.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleContextBuilder {
    limits: ContextLimits,
}

impl CycleContextBuilder {
    pub fn new(limits: ContextLimits) -> Self {
        Self { limits }
    }

    pub fn build(&self, snapshot: &ObserveSnapshot<'_>) -> CycleContext {
        CycleContext {
            plan: self.plan_block(snapshot.plan),
            evidence: self.evidence_block(snapshot.evidence),
            agents: self.agents_block(snapshot.agent_statuses),
            history: self.history_block(snapshot.cycle_runs),
            broadcasts: broadcasts_block(snapshot.broadcasts, snapshot.now_ms),
        }
    }

    fn plan_block(&self, plan: Option<&PlanNode>) -> String {
        let mut out = String::from("## Plan\n");
        let Some(root) = plan else {
            out.push_str("No plan yet.\n");
            return out;
        };

        let counts = count_nodes(Some(root));
        let _ = writeln!(
            out,
            "{} {}: {}% complete ({} nodes: {} completed, {} running, {} failed)",
            root.status.glyph(),
            root.title,
            calculate_progress(Some(root)),
            counts.total,
            counts.completed,
            counts.running,
            counts.failed,
        );

        let bottlenecks = find_bottlenecks(Some(root), self.limits.bottlenecks);
        if bottlenecks.is_empty() {
            out.push_str("Bottlenecks: none\n");
        } else {
            out.push_str("Bottlenecks:\n");
            for node in bottlenecks {
                let path = node_path(root, &node.id).unwrap_or_else(|| node.id.clone());
                let _ = writeln!(
                    out,
                    "- {} {} [{}] {} ({})",
                    node.status.glyph(),
                    node.status.as_str(),
                    node.assignee,
                    compact_text(&node.title, self.limits.task_chars),
                    path,
                );
            }
        }
        out
    }

    fn evidence_block(&self, evidence: &EvidenceLog) -> String {
        let mut out = String::from("## Recent evidence\n");
        let recent = evidence.recent(self.limits.evidence);
        if recent.is_empty() {
            out.push_str("None.\n");
        }
        for entry in recent {
            let _ = writeln!(
                out,
                "- {} [{}] {}: {}",
                entry.verdict.glyph(),
                entry.payload.type_tag(),
                entry.title,
                compact_text(&entry.summary, self.limits.output_chars),
            );
        }
        out
    }

    fn agents_block(&self, statuses: &BTreeMap<String, AgentStatusEntry>) -> String {
        let mut out = String::from("## Agents\n");
        if statuses.is_empty() {
            out.push_str("None.\n");
        }
        for (id, entry) in statuses.iter().take(self.limits.agents) {
            let _ = write!(out, "- {id}: {}", entry.status.as_str());
            if let Some(task) = entry.current_task.as_deref().filter(|t| !t.trim().is_empty()) {
                let _ = write!(out, " | task: {}", compact_text(task, self.limits.task_chars));
            }
            if let Some(last) = entry.last_output.as_deref().filter(|t| !t.trim().is_empty()) {
                let _ = write!(out, " | last: {}", compact_text(last, self.limits.output_chars));
            }
            out.push('\n');
        }
        if statuses.len() > self.limits.agents {
            let _ = writeln!(out, "(+{} more)", statuses.len() - self.limits.agents);
        }
        out
    }

    fn history_block(&self, runs: &[CycleRun]) -> String {
        let mut out = String::from("## Recent cycles\n");
        let completed: Vec<&CycleRun> = runs
            .iter()
            .rev()
            .filter(|run| run.status == CycleStatus::Completed)
            .take(self.limits.completed_runs)
            .collect();

        if completed.is_empty() {
            out.push_str("No completed cycles yet.\n");
        }
        for run in completed {
            let Some(output) = &run.output else {
                let _ = writeln!(out, "- {}: (no summary)", run.id);
                continue;
            };
            let _ = writeln!(
                out,
                "- {}: {}",
                run.id,
                truncate_chars(output.cycle_summary.trim(), self.limits.output_chars),
            );
            for item in &output.top_leverage {
                let _ = writeln!(
                    out,
                    "  - [{}] {}",
                    item.assignee,
                    compact_text(&item.title, self.limits.task_chars),
                );
            }
        }
        out.push_str(NO_REPEAT_INSTRUCTION);
        out.push('\n');
        out
    }
}

fn broadcasts_block(board: &BroadcastBoard, now_ms: i64) -> String {
    let mut out = String::from("## Active broadcasts\n");
    let active = board.active(now_ms);
    if active.is_empty() {
        out.push_str("None.\n");
    }
    for issued in active {
        let _ = writeln!(
            out,
            "- → {} ({}m left): {}",
            issued.broadcast.to,
            issued.minutes_left(now_ms),
            issued.broadcast.message,
        );
    }
    out
}
