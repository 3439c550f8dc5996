//! Orchestrator state load/save with plan schema + invariant validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::broadcast::BroadcastBoard;
use crate::core::evidence::EvidenceLog;
use crate::core::invariants::validate_invariants;
use crate::core::types::{AgentStatusEntry, CycleMetrics, CycleRun, Frame};
use crate::tree::PlanNode;

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan_tree.schema.json");

static PLAN_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).map_err(|err| err.to_string())?;
    validator_for(&schema).map_err(|err| err.to_string())
});

/// Everything the orchestrator remembers between cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorState {
    pub frame: Frame,
    pub plan: Option<PlanNode>,
    pub evidence: EvidenceLog,
    pub broadcasts: BroadcastBoard,
    pub cycle_runs: Vec<CycleRun>,
    pub agent_statuses: BTreeMap<String, AgentStatusEntry>,
    pub metrics: CycleMetrics,
}

/// Load and validate state from disk (plan schema + plan invariants).
pub fn load_state(path: &Path) -> Result<OrchestratorState> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    if let Some(plan) = value.get("plan").filter(|plan| !plan.is_null()) {
        validate_plan_schema(plan)?;
    }
    let state: OrchestratorState = serde_json::from_value(value)
        .with_context(|| format!("deserialize state {}", path.display()))?;
    if let Some(plan) = &state.plan {
        validate_plan_invariants(plan)?;
    }
    debug!(
        cycles = state.cycle_runs.len(),
        evidence = state.evidence.len(),
        "loaded state"
    );
    Ok(state)
}

/// Atomically write state to disk as pretty JSON.
pub fn write_state(path: &Path, state: &OrchestratorState) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state).context("serialize state json")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}

/// Validate a plan tree JSON value against the embedded schema.
pub fn validate_plan_schema(plan: &Value) -> Result<()> {
    let validator = PLAN_VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("invalid plan schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(plan)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "plan schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

pub fn validate_plan_invariants(plan: &PlanNode) -> Result<()> {
    let errors = validate_invariants(plan);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("plan invariants failed: {}", errors.join("; ")))
}
