//! Picks how many agents, and which ones, a cycle should staff.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const WORD_WEIGHT: f64 = 0.45;
const WORD_SCORE_CAP: u32 = 60;
const MIN_COMPLEXITY: u32 = 5;
const MAX_COMPLEXITY: u32 = 100;

/// Agents staffed first when present in the roster.
pub const PRIORITY_AGENT_ORDER: [&str; 12] = [
    "pm", "swe", "swe-2", "frontend", "qa", "ai-ml", "platform", "sre", "security", "cto", "cpo",
    "cro",
];

static KEYWORD_WEIGHTS: LazyLock<Vec<(Regex, u32)>> = LazyLock::new(|| {
    [
        (r"\b(migrate|refactor|rewrite)\b", 8),
        (r"\b(security|auth|permission|compliance)\b", 7),
        (r"\b(performance|latency|scale|scaling|throughput)\b", 6),
        (r"\b(multi-agent|autonomous|orchestrator|workflow)\b", 6),
        (r"\b(ci|test|build|deploy|release)\b", 5),
        (r"\b(ui|ux|design|frontend)\b", 4),
        (r"\b(api|backend|database|schema)\b", 4),
    ]
    .into_iter()
    .map(|(pattern, weight)| {
        (
            Regex::new(pattern).expect("keyword pattern should be valid"),
            weight,
        )
    })
    .collect()
});

#[derive(Debug, Clone, Copy)]
pub struct AgentFactoryInput<'a> {
    pub objective: &'a str,
    pub constraints: &'a str,
    pub verification: &'a str,
    /// Active agent ids in roster order.
    pub active_agent_ids: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFactorySelection {
    pub complexity_score: u32,
    pub target_headcount: usize,
    pub selected_agent_ids: Vec<String>,
    pub reason: String,
}

pub fn complexity_score(objective: &str, constraints: &str, verification: &str) -> u32 {
    let text = format!("{objective}\n{constraints}\n{verification}").to_lowercase();
    let words = text.split_whitespace().count();
    let mut score = ((words as f64 * WORD_WEIGHT).round() as u32).min(WORD_SCORE_CAP);
    for (rx, weight) in KEYWORD_WEIGHTS.iter() {
        score += rx.find_iter(&text).count() as u32 * weight;
    }
    score.clamp(MIN_COMPLEXITY, MAX_COMPLEXITY)
}

pub fn headcount_for(complexity: u32) -> usize {
    match complexity {
        0..=20 => 4,
        21..=35 => 6,
        36..=50 => 10,
        51..=70 => 16,
        _ => 24,
    }
}

pub fn select_agents_for_cycle(input: &AgentFactoryInput<'_>) -> AgentFactorySelection {
    let active = input.active_agent_ids;
    if active.is_empty() {
        return AgentFactorySelection {
            complexity_score: 0,
            target_headcount: 0,
            selected_agent_ids: Vec::new(),
            reason: "No active agents available.".to_string(),
        };
    }

    let score = complexity_score(input.objective, input.constraints, input.verification);
    let target = headcount_for(score).min(active.len());

    let mut selected: Vec<String> = Vec::with_capacity(target);
    let prioritized = PRIORITY_AGENT_ORDER
        .iter()
        .filter(|id| active.iter().any(|a| a == *id))
        .map(|id| (*id).to_string());
    for id in prioritized.chain(active.iter().cloned()) {
        if selected.len() >= target {
            break;
        }
        if !selected.contains(&id) {
            selected.push(id);
        }
    }

    AgentFactorySelection {
        complexity_score: score,
        target_headcount: target,
        selected_agent_ids: selected,
        reason: format!("Complexity {score} → target {target}/{} agents", active.len()),
    }
}
