//! Orchestrator configuration stored under `.orchestrator/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::llm::CallPolicy;

/// Orchestrator configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wall-clock limit for one planning call attempt.
    pub planning_timeout_secs: u64,

    /// Wall-clock limit for one agent call attempt.
    pub agent_timeout_secs: u64,

    /// Byte budget for a rendered prompt; droppable sections go first.
    pub prompt_budget_bytes: usize,

    /// Attempts per LLM call. 1 means no retry.
    pub max_llm_attempts: u32,

    /// Truncate collaborator stdout beyond this many bytes.
    pub llm_output_limit_bytes: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_cap_usd: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cycle_cost_usd: Option<f64>,

    /// `loop` stops after this many failed cycles in a row.
    pub max_consecutive_failures: u32,

    /// Evidence entries kept after each cycle.
    pub evidence_retention: usize,

    /// Expired or superseded broadcasts beyond this count are dropped after each cycle.
    pub broadcast_retention: usize,

    pub llm: LlmConfig,

    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Collaborator argv; the prompt goes to stdin, the response comes from stdout.
    pub command: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
    /// `strict`, `default` or `fast`; anything else behaves as `default`.
    pub norm_profile: String,
    pub active: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            norm_profile: "default".to_string(),
            active: true,
        }
    }
}

impl AgentConfig {
    pub fn new(id: &str, norm_profile: &str) -> Self {
        Self {
            id: id.to_string(),
            norm_profile: norm_profile.to_string(),
            active: true,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            planning_timeout_secs: 120,
            agent_timeout_secs: 60,
            prompt_budget_bytes: 40_000,
            max_llm_attempts: 1,
            llm_output_limit_bytes: 200_000,
            budget_cap_usd: None,
            estimated_cycle_cost_usd: None,
            max_consecutive_failures: 3,
            evidence_retention: 200,
            broadcast_retention: 100,
            llm: LlmConfig::default(),
            agents: vec![
                AgentConfig::new("pm", "default"),
                AgentConfig::new("swe", "default"),
                AgentConfig::new("qa", "default"),
            ],
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.planning_timeout_secs == 0 {
            return Err(anyhow!("planning_timeout_secs must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.max_llm_attempts == 0 {
            return Err(anyhow!("max_llm_attempts must be > 0"));
        }
        if self.llm_output_limit_bytes == 0 {
            return Err(anyhow!("llm_output_limit_bytes must be > 0"));
        }
        if self.llm.command.is_empty() || self.llm.command[0].trim().is_empty() {
            return Err(anyhow!("llm.command must be a non-empty array"));
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(anyhow!("agents[].id must be non-empty"));
            }
            // Agent ids become plan node id segments.
            if !agent
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(anyhow!(
                    "agent id '{}' may only contain ASCII letters, digits, '-' and '_'",
                    agent.id
                ));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(anyhow!("duplicate agent id '{}'", agent.id));
            }
        }
        Ok(())
    }

    /// Ids of active agents in roster order.
    pub fn active_agent_ids(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|agent| agent.active)
            .map(|agent| agent.id.clone())
            .collect()
    }

    pub fn norm_profile_for(&self, agent_id: &str) -> Option<&str> {
        self.agents
            .iter()
            .find(|agent| agent.id == agent_id)
            .map(|agent| agent.norm_profile.as_str())
    }

    pub fn planning_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.planning_timeout_secs),
            max_attempts: self.max_llm_attempts,
        }
    }

    pub fn agent_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.agent_timeout_secs),
            max_attempts: self.max_llm_attempts,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}
