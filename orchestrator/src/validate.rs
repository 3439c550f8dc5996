//! Validation of `.orchestrator/` layout, config and persisted state.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::core::aggregate::count_nodes;
use crate::io::config::load_config;
use crate::io::init::OrchestratorPaths;
use crate::io::state_store::load_state;

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutcome {
    pub frame_locked: bool,
    pub active_agents: usize,
    pub plan_nodes: u32,
    pub cycles: usize,
    pub evidence: usize,
}

/// Validate config and state: plan schema, plan invariants, roster.
pub fn validate_orchestrator(root: &Path) -> Result<ValidateOutcome> {
    let paths = OrchestratorPaths::new(root);
    if !paths.dir.is_dir() {
        return Err(anyhow!(
            "missing directory {} (run `orchestrator init` first)",
            paths.dir.display()
        ));
    }
    if !paths.state_path.is_file() {
        return Err(anyhow!("missing file {}", paths.state_path.display()));
    }

    let config = load_config(&paths.config_path).context("load config.toml")?;
    let state = load_state(&paths.state_path).context("load state.json")?;

    Ok(ValidateOutcome {
        frame_locked: state.frame.locked,
        active_agents: config.active_agent_ids().len(),
        plan_nodes: count_nodes(state.plan.as_ref()).total,
        cycles: state.cycle_runs.len(),
        evidence: state.evidence.len(),
    })
}
