//! Orchestrator-owned plan tree transitions.
//!
//! A cycle replaces the whole plan with a freshly materialized tree. After
//! that, each leaf is written only on behalf of its assignee: an agent's
//! report moves its own open leaves, and the orchestrator may fail them when
//! the agent's turn is rejected. Composite statuses are then re-derived.

use serde::Serialize;

use crate::core::aggregate::refresh_statuses;
use crate::core::evidence::{
    DiffData, Evidence, EvidencePayload, EvidenceVerdict, TerminalOutput,
};
use crate::core::planner::Directive;
use crate::core::selector::find_node_mut;
use crate::core::text::compact_text;
use crate::core::types::{AgentOutput, AgentReportStatus, CeoLlmOutput, RepoAction};
use crate::tree::{PlanNode, PlanNodeStatus, ToolUse};

pub const PLANNER_ASSIGNEE: &str = "ceo";
const LEAF_TITLE_CHARS: usize = 80;
const WRITE_CODE_ACTION: &str = "write_code";
/// Joins plan node id segments; agent ids may not contain it.
pub const ID_SEP: char = '.';

/// Which nodes a transition touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSummary {
    /// Leaves whose status was set directly.
    pub status_set: Vec<String>,
    /// Composite nodes whose status changed by aggregation.
    pub aggregated: Vec<String>,
}

/// Build the plan tree for one cycle.
///
/// Shape: root (`ceo`) → one node per directive target → one leaf per
/// leverage item assigned to that target, or a single leaf carrying the
/// directive itself. Leaves start `running`.
///
/// Ids are `.`-joined segments (`run.agent.n`). Agent ids never contain
/// `.`, so a leaf id can not collide with another agent's group id.
pub fn materialize_plan(
    run_id: &str,
    goal: &str,
    output: &CeoLlmOutput,
    directives: &[Directive],
    now_ms: i64,
) -> PlanNode {
    let title = match goal.trim() {
        "" => format!("Cycle {run_id}"),
        goal => goal.to_string(),
    };
    let mut root = PlanNode::new(run_id, title, PLANNER_ASSIGNEE, PlanNodeStatus::Pending);
    root.description = Some(output.cycle_summary.clone()).filter(|s| !s.trim().is_empty());
    root.started_at = Some(now_ms);

    for directive in directives {
        let agent_id = directive.to.as_str();
        let group_id = format!("{run_id}{ID_SEP}{agent_id}");
        let mut group = PlanNode::new(
            group_id.clone(),
            format!("{agent_id}: {}", compact_text(&directive.why, LEAF_TITLE_CHARS)),
            agent_id,
            PlanNodeStatus::Pending,
        );
        group.description = Some(directive.message.clone());
        group.is_parallel = true;

        let items: Vec<_> = output
            .top_leverage
            .iter()
            .filter(|item| item.assignee == agent_id)
            .collect();

        if items.is_empty() {
            let mut leaf = PlanNode::new(
                format!("{group_id}{ID_SEP}1"),
                compact_text(&directive.message, LEAF_TITLE_CHARS),
                agent_id,
                PlanNodeStatus::Running,
            );
            leaf.reasoning = Some(directive.why.clone());
            leaf.started_at = Some(now_ms);
            group.children.push(leaf);
        }

        for (index, item) in items.into_iter().enumerate() {
            let mut leaf = PlanNode::new(
                format!("{group_id}{ID_SEP}{}", index + 1),
                item.title.clone(),
                agent_id,
                PlanNodeStatus::Running,
            );
            leaf.risk_level = Some(item.risk);
            leaf.priority = u8::try_from(index + 1).ok();
            leaf.reasoning = Some(item.why.clone()).filter(|s| !s.is_empty());
            if !item.acceptance.is_empty() {
                leaf.description = Some(format!("Acceptance: {}", item.acceptance.join("; ")));
            }
            leaf.started_at = Some(now_ms);
            group.children.push(leaf);
        }

        root.children.push(group);
    }

    refresh_statuses(&mut root);
    root
}

/// Apply an agent's self-reported status to its own open leaves.
pub fn apply_agent_report(
    root: &mut PlanNode,
    agent_id: &str,
    status: AgentReportStatus,
    summary: &str,
) -> TransitionSummary {
    let target = match status {
        AgentReportStatus::Completed => PlanNodeStatus::Completed,
        AgentReportStatus::InProgress => PlanNodeStatus::Running,
        AgentReportStatus::Blocked => PlanNodeStatus::Blocked,
    };
    transition_open_leaves(root, agent_id, target, summary)
}

/// Mark an agent's open leaves `failed`, e.g. after a denied or broken turn.
pub fn fail_agent_nodes(root: &mut PlanNode, agent_id: &str, reason: &str) -> TransitionSummary {
    transition_open_leaves(root, agent_id, PlanNodeStatus::Failed, reason)
}

fn transition_open_leaves(
    root: &mut PlanNode,
    agent_id: &str,
    target: PlanNodeStatus,
    note: &str,
) -> TransitionSummary {
    let mut summary = TransitionSummary::default();
    set_leaves(root, agent_id, target, note, &mut summary.status_set);
    summary.aggregated = refresh_statuses(root);
    summary
}

fn set_leaves(
    node: &mut PlanNode,
    agent_id: &str,
    target: PlanNodeStatus,
    note: &str,
    touched: &mut Vec<String>,
) {
    if node.is_leaf() {
        if node.assignee == agent_id && !node.status.is_terminal() {
            node.status = target;
            if !note.trim().is_empty() {
                node.output_summary = Some(note.to_string());
            }
            touched.push(node.id.clone());
        }
        return;
    }
    for child in &mut node.children {
        set_leaves(child, agent_id, target, note, touched);
    }
}

/// First open leaf owned by `agent_id`; evidence from its turn links here.
pub fn agent_focus_node<'a>(root: &'a PlanNode, agent_id: &str) -> Option<&'a PlanNode> {
    if root.is_leaf() {
        return (root.assignee == agent_id && !root.status.is_terminal()).then_some(root);
    }
    root.children
        .iter()
        .find_map(|child| agent_focus_node(child, agent_id))
}

/// Record the repository actions of an accepted turn on `node_id`.
///
/// Returns `false` when the node is not in the tree.
pub fn record_tool_uses(
    root: &mut PlanNode,
    node_id: &str,
    output: &AgentOutput,
    now_ms: i64,
) -> bool {
    let Some(node) = find_node_mut(root, node_id) else {
        return false;
    };
    node.tools_used.extend(output.repo_actions.iter().map(|action| ToolUse {
        tool: action.kind.clone(),
        command: action.command().map(str::to_string),
        output: None,
        timestamp: now_ms,
    }));
    true
}

/// Evidence implied by an accepted agent output.
///
/// Every `write_code` action with a diff becomes `diff` evidence and every
/// requested repository command becomes `terminal` evidence.
pub fn derive_evidence(
    cycle_id: &str,
    agent_id: &str,
    node_id: Option<&str>,
    output: &AgentOutput,
    now_ms: i64,
) -> Vec<Evidence> {
    let mut derived = Vec::new();
    let mut next_id = {
        let mut counter = 0;
        move || {
            counter += 1;
            format!("{cycle_id}{ID_SEP}{agent_id}{ID_SEP}ev-{counter}")
        }
    };

    for action in &output.actions {
        if action.kind != WRITE_CODE_ACTION {
            continue;
        }
        let Some(patch) = action.code_diff.as_deref().filter(|d| !d.trim().is_empty()) else {
            continue;
        };
        let path = action
            .files
            .as_ref()
            .and_then(|files| files.first())
            .cloned()
            .unwrap_or_default();
        let diff = DiffData::from_patch(path, patch);
        derived.push(Evidence {
            id: next_id(),
            title: action.title.clone(),
            timestamp: now_ms,
            related_node_id: node_id.map(str::to_string),
            related_agent_id: agent_id.to_string(),
            summary: format!("+{} -{} lines", diff.added, diff.removed),
            verdict: EvidenceVerdict::Info,
            payload: EvidencePayload::Diff(diff),
        });
    }

    for command in output.repo_actions.iter().filter_map(RepoAction::command) {
        derived.push(Evidence {
            id: next_id(),
            title: format!("Requested command: {}", compact_text(command, LEAF_TITLE_CHARS)),
            timestamp: now_ms,
            related_node_id: node_id.map(str::to_string),
            related_agent_id: agent_id.to_string(),
            summary: format!("{agent_id} reported running `{command}`"),
            verdict: EvidenceVerdict::Info,
            payload: EvidencePayload::Terminal(TerminalOutput {
                command: command.to_string(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: 0,
            }),
        });
    }

    derived
}
