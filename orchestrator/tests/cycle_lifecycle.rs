//! End-to-end cycle tests against a scripted LLM collaborator.
//!
//! Each test initializes `.orchestrator/` in a temp dir, runs `run_cycle_in`
//! and inspects the persisted state.

use std::time::Duration;

use orchestrator::core::broadcast::BroadcastStatus;
use orchestrator::core::norms::{NormDecisionKind, NormRuleId};
use orchestrator::core::types::{AgentRunState, CycleStatus};
use orchestrator::cycle::{AgentTurnResult, CycleFailedError, CycleOutcome, run_cycle_in};
use orchestrator::io::config::{AgentConfig, OrchestratorConfig, write_config};
use orchestrator::io::state_store::load_state;
use orchestrator::test_support::{ScriptedLlm, TestWorkspace};
use orchestrator::tree::PlanNodeStatus;
use orchestrator::validate::validate_orchestrator;

const PLAN: &str = r#"```json
{
  "cycleSummary": "Draft the brief and build the login form",
  "topLeverage": [
    {"title": "Build form markup", "assignee": "swe-2", "why": "Unblocks QA", "risk": "medium"},
    {"title": "Wire submit handler", "assignee": "swe-2", "acceptance": ["posts to /login"]}
  ],
  "broadcasts": [
    {"to": "pm", "message": "Draft the product brief", "expiresMins": 30},
    {"to": "swe-2", "message": "Build the login form", "expiresMins": 500},
    {"to": "cto", "message": "Review architecture", "expiresMins": 60}
  ],
  "needsExternalData": false
}
```"#;

const PM_REPLY: &str = r#"{
  "actions": [{"type": "note", "title": "Wrote brief", "detail": "docs/brief.md"}],
  "status": "completed",
  "output": "Brief drafted",
  "repoActions": [{"type": "run_bash", "params": {"command": "npm run lint"}}]
}"#;

const SWE_NO_DIFF: &str = r#"{
  "actions": [{"type": "write_code", "title": "Add form"}],
  "status": "completed",
  "output": "done"
}"#;

fn two_agent_config() -> OrchestratorConfig {
    OrchestratorConfig {
        agents: vec![
            AgentConfig::new("pm", "default"),
            AgentConfig::new("swe-2", "default"),
        ],
        ..OrchestratorConfig::default()
    }
}

const SIMILAR_IDS_PLAN: &str = r#"{
  "cycleSummary": "Split the login work",
  "topLeverage": [
    {"title": "Build form markup", "assignee": "swe"},
    {"title": "Wire submit handler", "assignee": "swe"}
  ],
  "broadcasts": [
    {"to": "swe", "message": "Build the login form"},
    {"to": "swe-2", "message": "Review the login form"}
  ]
}"#;

const DONE_REPLY: &str = r#"{"actions": [], "status": "completed", "output": "done"}"#;

fn similar_ids_config() -> OrchestratorConfig {
    OrchestratorConfig {
        agents: vec![
            AgentConfig::new("swe", "fast"),
            AgentConfig::new("swe-2", "fast"),
        ],
        ..OrchestratorConfig::default()
    }
}

/// Planning, broadcast sanitization, concurrent dispatch and per-agent gating
/// in one cycle: pm's report is applied, swe-2's is denied for a missing diff.
#[tokio::test]
async fn cycle_applies_allowed_reports_and_fails_denied_ones() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    write_config(&ws.paths.config_path, &two_agent_config()).expect("config");
    let llm = ScriptedLlm::new()
        .respond("role: ceo", PLAN)
        .respond("agent_id: pm\n", PM_REPLY)
        .respond("agent_id: swe-2\n", SWE_NO_DIFF);

    let outcome = run_cycle_in(&ws.paths, &llm).await.expect("cycle");
    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle");
    };

    assert_eq!(report.cycle_id, "cycle-1");
    assert!(!report.planned.used_fallback);
    assert_eq!(report.planned.directives.len(), 2);
    assert_eq!(report.planned.directives[1].expires_mins, 240);
    assert!(report.broadcast_decisions.iter().any(|d| {
        d.rule_id == NormRuleId::BroadcastTargetActive && d.decision == NormDecisionKind::Revise
    }));

    let pm = &report.agents[0];
    assert_eq!(pm.agent_id, "pm");
    assert!(matches!(pm.result, AgentTurnResult::Applied { evidence: 1, .. }));
    let swe = &report.agents[1];
    assert_eq!(swe.agent_id, "swe-2");
    assert!(matches!(swe.result, AgentTurnResult::Denied { .. }));

    let state = load_state(&ws.paths.state_path).expect("state");
    let plan = state.plan.as_ref().expect("plan");
    assert_eq!(plan.id, "cycle-1");
    assert_eq!(plan.status, PlanNodeStatus::Failed);
    assert_eq!(plan.children.len(), 2);
    assert_eq!(plan.children[0].status, PlanNodeStatus::Completed);
    assert_eq!(plan.children[1].children.len(), 2);
    let pm_tools = &plan.children[0].children[0].tools_used;
    assert_eq!(pm_tools.len(), 1);
    assert_eq!(pm_tools[0].command.as_deref(), Some("npm run lint"));

    assert_eq!(state.metrics.completed_tasks, 1);
    assert_eq!(state.metrics.total_tasks, 3);
    assert_eq!(state.metrics.violations, 1);
    assert_eq!(state.evidence.len(), 1);
    assert_eq!(state.agent_statuses["pm"].status, AgentRunState::Completed);
    assert_eq!(state.agent_statuses["swe-2"].status, AgentRunState::Failed);
    assert_eq!(state.cycle_runs[0].status, CycleStatus::Completed);
    assert_eq!(state.broadcasts.all().len(), 2);
    assert!(report.score.score < 100);
}

/// Agents `swe` and `swe-2` share a prefix; the saved plan must still load.
#[tokio::test]
async fn plan_for_prefixed_agent_ids_reloads() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    write_config(&ws.paths.config_path, &similar_ids_config()).expect("config");
    let llm = ScriptedLlm::new()
        .respond("role: ceo", SIMILAR_IDS_PLAN)
        .respond("agent_id: swe\n", DONE_REPLY)
        .respond("agent_id: swe-2\n", DONE_REPLY);

    run_cycle_in(&ws.paths, &llm).await.expect("first cycle");
    let state = load_state(&ws.paths.state_path).expect("state reloads");
    let plan = state.plan.as_ref().expect("plan");
    assert_eq!(plan.children[0].children.len(), 2);
    assert_eq!(plan.children[1].id, "cycle-1.swe-2");
    assert_eq!(plan.status, PlanNodeStatus::Completed);

    run_cycle_in(&ws.paths, &llm).await.expect("second cycle");
    validate_orchestrator(&ws.paths.root).expect("validate");
}

/// Inactive broadcasts beyond the retention cap are dropped after a cycle.
#[tokio::test]
async fn inactive_broadcasts_are_pruned() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    let config = OrchestratorConfig {
        broadcast_retention: 0,
        ..two_agent_config()
    };
    write_config(&ws.paths.config_path, &config).expect("config");
    let llm = ScriptedLlm::new()
        .respond("role: ceo", PLAN)
        .respond("agent_id: pm\n", PM_REPLY)
        .respond("agent_id: swe-2\n", SWE_NO_DIFF);

    run_cycle_in(&ws.paths, &llm).await.expect("first cycle");
    run_cycle_in(&ws.paths, &llm).await.expect("second cycle");

    let state = load_state(&ws.paths.state_path).expect("state");
    let issued = state.broadcasts.all();
    assert_eq!(issued.len(), 2);
    assert!(
        issued
            .iter()
            .all(|b| b.status == BroadcastStatus::Active && b.cycle_id == "cycle-2")
    );
}

/// The second cycle sees the first one in its planning prompt.
#[tokio::test]
async fn second_cycle_prompt_carries_history() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    write_config(&ws.paths.config_path, &two_agent_config()).expect("config");
    let llm = ScriptedLlm::new()
        .respond("role: ceo", PLAN)
        .respond("agent_id: pm\n", PM_REPLY)
        .respond("agent_id: swe-2\n", SWE_NO_DIFF);

    run_cycle_in(&ws.paths, &llm).await.expect("first cycle");
    run_cycle_in(&ws.paths, &llm).await.expect("second cycle");

    let planning_prompts: Vec<String> = llm
        .calls()
        .into_iter()
        .filter(|prompt| prompt.contains("role: ceo"))
        .collect();
    assert_eq!(planning_prompts.len(), 2);
    assert!(planning_prompts[1].contains("Draft the brief and build the login form"));
    assert!(planning_prompts[1].contains("Do not repeat directives"));

    let state = load_state(&ws.paths.state_path).expect("state");
    assert_eq!(state.cycle_runs.len(), 2);
    assert_eq!(state.plan.as_ref().map(|p| p.id.as_str()), Some("cycle-2"));
    let superseded = state
        .broadcasts
        .all()
        .iter()
        .filter(|issued| issued.status == BroadcastStatus::Superseded)
        .count();
    assert_eq!(superseded, 2);
    assert!(state.broadcasts.all()[..2].iter().all(|issued| issued.cycle_id == "cycle-1"));
}

#[tokio::test]
async fn planning_failure_is_recorded_as_failed_cycle() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    let llm = ScriptedLlm::new().fail("role: ceo", "transport reset");

    let err = run_cycle_in(&ws.paths, &llm).await.expect_err("planning fails");
    let failed = err.downcast_ref::<CycleFailedError>().expect("typed error");
    assert_eq!(failed.cycle_id, "cycle-1");
    assert!(failed.message.contains("transport reset"));

    let state = load_state(&ws.paths.state_path).expect("state");
    assert_eq!(state.cycle_runs[0].status, CycleStatus::Failed);
    assert!(state.cycle_runs[0].ended_at.is_some());
    assert!(state.plan.is_none());
}

#[tokio::test]
async fn invalid_planning_contract_fails_the_cycle() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    let llm = ScriptedLlm::new().respond("role: ceo", r#"{"topLeverage": [], "broadcasts": []}"#);

    let err = run_cycle_in(&ws.paths, &llm).await.expect_err("contract violation");
    let failed = err.downcast_ref::<CycleFailedError>().expect("typed error");
    assert!(failed.message.contains("cycleSummary"));
}

/// A slow agent fails only its own nodes; the cycle still completes.
#[tokio::test]
async fn agent_timeout_fails_only_that_agent() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    let config = OrchestratorConfig {
        agent_timeout_secs: 1,
        ..two_agent_config()
    };
    write_config(&ws.paths.config_path, &config).expect("config");
    let llm = ScriptedLlm::new()
        .respond("role: ceo", PLAN)
        .respond("agent_id: pm\n", PM_REPLY)
        .delayed("agent_id: swe-2\n", Duration::from_secs(5), SWE_NO_DIFF);

    let outcome = run_cycle_in(&ws.paths, &llm).await.expect("cycle");
    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle");
    };
    let AgentTurnResult::Failed { error } = &report.agents[1].result else {
        panic!("expected swe-2 to fail");
    };
    assert!(error.contains("timed out"));

    let state = load_state(&ws.paths.state_path).expect("state");
    assert_eq!(state.metrics.violations, 0);
    assert_eq!(state.agent_statuses["swe-2"].status, AgentRunState::Failed);
}

/// With no broadcast surviving the norms, the factory fallback still directs agents.
#[tokio::test]
async fn empty_broadcasts_fall_back_to_factory_selection() {
    let ws = TestWorkspace::new("Ship the login page").expect("workspace");
    write_config(&ws.paths.config_path, &two_agent_config()).expect("config");
    let llm = ScriptedLlm::new()
        .respond(
            "role: ceo",
            r#"{"cycleSummary": "idle", "topLeverage": [], "broadcasts": [{"to": "pm", "message": "  "}]}"#,
        )
        .respond("agent_id: pm\n", PM_REPLY)
        .respond(
            "agent_id: swe-2\n",
            r#"{"actions": [], "status": "in_progress", "output": "reading code"}"#,
        );

    let CycleOutcome::Completed(report) = run_cycle_in(&ws.paths, &llm).await.expect("cycle")
    else {
        panic!("expected a completed cycle");
    };
    assert!(report.planned.used_fallback);
    assert_eq!(report.planned.directives.len(), 2);
    assert!(report.planned.directives[0].message.starts_with("[Factory fallback]"));

    let state = load_state(&ws.paths.state_path).expect("state");
    assert_eq!(state.plan.as_ref().map(|p| p.status), Some(PlanNodeStatus::Running));
}

#[tokio::test]
async fn unlocked_frame_denies_the_cycle_without_recording_it() {
    let ws = TestWorkspace::new("").expect("workspace");
    let llm = ScriptedLlm::new();

    let outcome = run_cycle_in(&ws.paths, &llm).await.expect("cycle");
    let CycleOutcome::Denied { decisions } = outcome else {
        panic!("expected denial");
    };
    assert!(
        decisions
            .iter()
            .any(|d| d.rule_id == NormRuleId::FrameLockRequired)
    );
    assert!(llm.calls().is_empty());
    let state = load_state(&ws.paths.state_path).expect("state");
    assert!(state.cycle_runs.is_empty());
}
