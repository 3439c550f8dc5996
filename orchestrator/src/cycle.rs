//! One Observe → Plan → Act → Evaluate cycle.
//!
//! Exactly one planning call is awaited per cycle. Directives are then
//! dispatched to agents concurrently; their responses are validated, gated by
//! the agent-output norms and applied to the plan one at a time, so the plan
//! only ever has a single writer.

use std::fmt;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::contract::{parse_agent_output, parse_ceo_output};
use crate::core::aggregate::{count_leaves, refresh_statuses};
use crate::core::autonomy::{AutonomyScoreCard, compute_autonomy_score};
use crate::core::context::{CycleContextBuilder, ObserveSnapshot};
use crate::core::factory::{AgentFactoryInput, select_agents_for_cycle};
use crate::core::norms::{
    AgentOutputNormInput, NormDecision, NormDecisionKind, PreCycleNormInput, is_norm_allowed,
    run_agent_output_norms, run_broadcast_norms, run_pre_cycle_norms,
};
use crate::core::planner::{Directive, PlanBroadcastInput, PlannedBroadcasts, plan_cycle_broadcasts};
use crate::core::state_update::{
    agent_focus_node, apply_agent_report, derive_evidence, fail_agent_nodes, materialize_plan,
    record_tool_uses,
};
use crate::core::text::compact_text;
use crate::core::types::{AgentReportStatus, AgentRunState, CeoLlmOutput, CycleRun, CycleStatus};
use crate::io::config::{OrchestratorConfig, load_config};
use crate::io::init::OrchestratorPaths;
use crate::io::llm::{LlmClient, call_with_policy};
use crate::io::prompt::{AgentPromptInput, PlanningPromptInput, PromptBuilder};
use crate::io::state_store::{OrchestratorState, load_state, write_state};

const STATUS_NOTE_CHARS: usize = 240;

/// The planning step failed; the cycle was recorded as `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailedError {
    pub cycle_id: String,
    pub message: String,
}

impl fmt::Display for CycleFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle {} failed: {}", self.cycle_id, self.message)
    }
}

impl std::error::Error for CycleFailedError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Pre-cycle norms denied the start; nothing was recorded.
    Denied { decisions: Vec<NormDecision> },
    Completed(CycleReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle_id: String,
    pub summary: String,
    pub broadcast_decisions: Vec<NormDecision>,
    pub planned: PlannedBroadcasts,
    pub agents: Vec<AgentTurn>,
    pub score: AutonomyScoreCard,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurn {
    pub agent_id: String,
    pub result: AgentTurnResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AgentTurnResult {
    Applied {
        status: AgentReportStatus,
        decisions: Vec<NormDecision>,
        evidence: usize,
    },
    Denied {
        decisions: Vec<NormDecision>,
    },
    Failed {
        error: String,
    },
}

impl AgentTurnResult {
    fn count(&self, kind: NormDecisionKind) -> u32 {
        match self {
            AgentTurnResult::Applied { decisions, .. } | AgentTurnResult::Denied { decisions } => {
                decisions.iter().filter(|d| d.decision == kind).count() as u32
            }
            AgentTurnResult::Failed { .. } => 0,
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Load state, run one cycle, and persist state whatever the outcome.
pub async fn run_cycle_in<L: LlmClient>(paths: &OrchestratorPaths, llm: &L) -> Result<CycleOutcome> {
    let config = load_config(&paths.config_path)?;
    let mut state = load_state(&paths.state_path)
        .with_context(|| format!("load {}", paths.state_path.display()))?;
    let outcome = run_cycle(&mut state, &config, llm).await;
    if !matches!(outcome, Ok(CycleOutcome::Denied { .. })) {
        write_state(&paths.state_path, &state)?;
    }
    outcome
}

/// Run one cycle against in-memory state.
///
/// A denied start returns [`CycleOutcome::Denied`] and leaves `state`
/// untouched apart from expiring broadcasts. A planning failure records a
/// failed [`CycleRun`] and returns [`CycleFailedError`]. Agent failures never
/// fail the cycle; they fail that agent's plan nodes.
#[instrument(skip_all, fields(cycle = state.cycle_runs.len() + 1))]
pub async fn run_cycle<L: LlmClient>(
    state: &mut OrchestratorState,
    config: &OrchestratorConfig,
    llm: &L,
) -> Result<CycleOutcome> {
    let started_at = now_ms();
    let active = config.active_agent_ids();

    let expired = state.broadcasts.expire(started_at);
    if expired > 0 {
        debug!(expired, "expired broadcasts");
    }

    let pre_cycle = run_pre_cycle_norms(&PreCycleNormInput {
        frame_locked: state.frame.locked,
        goal: &state.frame.goal,
        active_agent_ids: &active,
        budget_cap_usd: config.budget_cap_usd,
        estimated_cycle_cost_usd: config.estimated_cycle_cost_usd,
    });
    if !is_norm_allowed(&pre_cycle) {
        info!(decisions = pre_cycle.len(), "cycle start denied by norms");
        return Ok(CycleOutcome::Denied {
            decisions: pre_cycle,
        });
    }

    let cycle_id = format!("cycle-{}", state.cycle_runs.len() + 1);
    state.cycle_runs.push(CycleRun {
        id: cycle_id.clone(),
        status: CycleStatus::Running,
        started_at,
        ended_at: None,
        output: None,
        error: None,
    });

    let frame = state.frame.clone();
    let factory = select_agents_for_cycle(&AgentFactoryInput {
        objective: &frame.goal,
        constraints: &frame.constraints,
        verification: &frame.verification,
        active_agent_ids: &active,
    });
    debug!(reason = %factory.reason, "agent factory selection");

    let planning = plan(state, config, llm, &factory.selected_agent_ids, &factory.reason).await;
    let output = match planning {
        Ok(output) => output,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(cycle_id = %cycle_id, error = %message, "planning failed");
            finish_run(state, &cycle_id, CycleStatus::Failed, None, Some(message.clone()));
            return Err(CycleFailedError { cycle_id, message }.into());
        }
    };

    let sanitized = run_broadcast_norms(&output.broadcasts, &active);
    let planned = plan_cycle_broadcasts(&PlanBroadcastInput {
        objective: &frame.goal,
        constraints: &frame.constraints,
        active_agent_ids: &active,
        factory: &factory,
        output: &output,
        sanitized: &sanitized.broadcasts,
    });
    if let Some(reason) = &planned.fallback_reason {
        info!(reason = %reason, "using fallback directives");
    }

    let dispatched_at = now_ms();
    let issued: Vec<_> = planned.directives.iter().map(Directive::as_broadcast).collect();
    state.broadcasts.publish(&cycle_id, &issued, dispatched_at);
    let mut plan_tree = materialize_plan(
        &cycle_id,
        &frame.goal,
        &output,
        &planned.directives,
        dispatched_at,
    );
    for directive in &planned.directives {
        let entry = state.agent_statuses.entry(directive.to.clone()).or_default();
        entry.status = AgentRunState::Running;
        entry.current_task = Some(directive.message.clone());
        entry.updated_at = dispatched_at;
    }

    let responses = dispatch(config, llm, &frame.goal, &frame.constraints, &planned.directives).await;

    let applied_at = now_ms();
    let mut turns = Vec::with_capacity(responses.len());
    for (directive, response) in planned.directives.iter().zip(responses) {
        let agent_id = directive.to.as_str();
        let (result, note) = match response
            .and_then(|raw| parse_agent_output(&raw).context("agent response"))
        {
            Ok(agent_output) => {
                let profile = config.norm_profile_for(agent_id);
                let norms = run_agent_output_norms(&AgentOutputNormInput::from_output(
                    agent_id,
                    profile,
                    &agent_output,
                ));
                if norms.allowed {
                    let focus = agent_focus_node(&plan_tree, agent_id).map(|node| node.id.clone());
                    let evidence = derive_evidence(
                        &cycle_id,
                        agent_id,
                        focus.as_deref(),
                        &agent_output,
                        applied_at,
                    );
                    let evidence_count = evidence.len();
                    for entry in evidence {
                        state.evidence.append(entry);
                    }
                    if let Some(node_id) = focus.as_deref() {
                        record_tool_uses(&mut plan_tree, node_id, &agent_output, applied_at);
                    }
                    let note = compact_text(&agent_output.output, STATUS_NOTE_CHARS);
                    apply_agent_report(&mut plan_tree, agent_id, agent_output.status, &note);
                    let result = AgentTurnResult::Applied {
                        status: agent_output.status,
                        decisions: norms.decisions,
                        evidence: evidence_count,
                    };
                    (result, note)
                } else {
                    let reasons = denied_reasons(&norms.decisions);
                    fail_agent_nodes(&mut plan_tree, agent_id, &reasons);
                    let result = AgentTurnResult::Denied {
                        decisions: norms.decisions,
                    };
                    (result, reasons)
                }
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(agent_id, error = %error, "agent turn failed");
                fail_agent_nodes(&mut plan_tree, agent_id, &error);
                (AgentTurnResult::Failed { error: error.clone() }, error)
            }
        };
        record_agent_status(state, agent_id, &result, &note, applied_at);
        debug!(agent_id, result = result_label(&result), "agent turn evaluated");
        turns.push(AgentTurn {
            agent_id: agent_id.to_string(),
            result,
        });
    }

    refresh_statuses(&mut plan_tree);
    let (completed, total) = count_leaves(Some(&plan_tree));
    let metrics = &mut state.metrics;
    metrics.completed_tasks += completed;
    metrics.total_tasks += total;
    for turn in &turns {
        metrics.violations += turn.result.count(NormDecisionKind::Deny);
        metrics.rework += turn.result.count(NormDecisionKind::Revise);
    }
    state.plan = Some(plan_tree);
    let pruned = state.evidence.prune(config.evidence_retention);
    if pruned > 0 {
        debug!(pruned, "pruned evidence");
    }
    let pruned = state.broadcasts.prune(config.broadcast_retention);
    if pruned > 0 {
        debug!(pruned, "pruned broadcasts");
    }

    let summary = output.cycle_summary.clone();
    finish_run(state, &cycle_id, CycleStatus::Completed, Some(output), None);
    let score = compute_autonomy_score(&state.metrics.into());
    info!(cycle_id = %cycle_id, score = score.score, level = %score.level, "cycle completed");

    Ok(CycleOutcome::Completed(CycleReport {
        cycle_id,
        summary,
        broadcast_decisions: sanitized.decisions,
        planned,
        agents: turns,
        score,
    }))
}

/// Observe, render the planning prompt, call the planner and validate its reply.
async fn plan<L: LlmClient>(
    state: &OrchestratorState,
    config: &OrchestratorConfig,
    llm: &L,
    roster: &[String],
    factory_reason: &str,
) -> Result<CeoLlmOutput> {
    let context = CycleContextBuilder::default().build(&ObserveSnapshot {
        plan: state.plan.as_ref(),
        evidence: &state.evidence,
        agent_statuses: &state.agent_statuses,
        cycle_runs: &state.cycle_runs,
        broadcasts: &state.broadcasts,
        now_ms: now_ms(),
    });
    let prompt = PromptBuilder::new(config.prompt_budget_bytes).build_planning(
        &PlanningPromptInput {
            goal: &state.frame.goal,
            constraints: &state.frame.constraints,
            verification: &state.frame.verification,
            roster,
            factory_reason,
            context: &context,
        },
    )?;
    let raw = call_with_policy(llm, prompt.as_str(), config.planning_policy())
        .await
        .context("planning call")?;
    parse_ceo_output(&raw).context("planning response")
}

/// Send every directive concurrently. Results keep directive order.
async fn dispatch<L: LlmClient>(
    config: &OrchestratorConfig,
    llm: &L,
    goal: &str,
    constraints: &str,
    directives: &[Directive],
) -> Vec<Result<String>> {
    let builder = PromptBuilder::new(config.prompt_budget_bytes);
    let policy = config.agent_policy();
    let calls = directives.iter().map(|directive| {
        let builder = &builder;
        async move {
            let prompt = builder.build_agent(&AgentPromptInput {
                directive,
                norm_profile: config.norm_profile_for(&directive.to).unwrap_or("default"),
                goal,
                constraints,
            })?;
            call_with_policy(llm, prompt.as_str(), policy)
                .await
                .with_context(|| format!("agent {} call", directive.to))
        }
    });
    join_all(calls).await
}

fn denied_reasons(decisions: &[NormDecision]) -> String {
    decisions
        .iter()
        .filter(|d| d.decision == NormDecisionKind::Deny)
        .map(|d| format!("{}: {}", d.rule_id, d.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn result_label(result: &AgentTurnResult) -> &'static str {
    match result {
        AgentTurnResult::Applied { .. } => "applied",
        AgentTurnResult::Denied { .. } => "denied",
        AgentTurnResult::Failed { .. } => "failed",
    }
}

fn record_agent_status(
    state: &mut OrchestratorState,
    agent_id: &str,
    result: &AgentTurnResult,
    note: &str,
    now_ms: i64,
) {
    let entry = state.agent_statuses.entry(agent_id.to_string()).or_default();
    entry.status = match result {
        AgentTurnResult::Applied { status, .. } => match status {
            AgentReportStatus::Completed => AgentRunState::Completed,
            AgentReportStatus::InProgress => AgentRunState::Running,
            AgentReportStatus::Blocked => AgentRunState::Blocked,
        },
        AgentTurnResult::Denied { .. } | AgentTurnResult::Failed { .. } => AgentRunState::Failed,
    };
    entry.last_output = Some(compact_text(note, STATUS_NOTE_CHARS)).filter(|s| !s.is_empty());
    entry.updated_at = now_ms;
}

fn finish_run(
    state: &mut OrchestratorState,
    cycle_id: &str,
    status: CycleStatus,
    output: Option<CeoLlmOutput>,
    error: Option<String>,
) {
    if let Some(run) = state.cycle_runs.iter_mut().rev().find(|run| run.id == cycle_id) {
        run.status = status;
        run.ended_at = Some(now_ms());
        run.output = output;
        run.error = error;
    }
}
