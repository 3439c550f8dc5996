//! Turns sanitized broadcasts into the per-agent directives of one cycle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::broadcast::Broadcast;
use crate::core::factory::AgentFactorySelection;
use crate::core::text::compact_text;
use crate::core::types::CeoLlmOutput;

const MAX_FALLBACK_TARGETS: usize = 8;
const FALLBACK_TTL_MINS: u32 = 90;
const OBJECTIVE_CHARS: usize = 180;
const CONSTRAINT_CHARS: usize = 120;
const DEFAULT_OBJECTIVE: &str = "Advance current autonomous goal";
const DEFAULT_WHY: &str = "Top leverage item";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    pub to: String,
    pub message: String,
    pub why: String,
    pub expires_mins: u32,
}

impl Directive {
    pub fn as_broadcast(&self) -> Broadcast {
        Broadcast {
            to: self.to.clone(),
            message: self.message.clone(),
            expires_mins: self.expires_mins,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanBroadcastInput<'a> {
    pub objective: &'a str,
    pub constraints: &'a str,
    pub active_agent_ids: &'a [String],
    pub factory: &'a AgentFactorySelection,
    pub output: &'a CeoLlmOutput,
    pub sanitized: &'a [Broadcast],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBroadcasts {
    pub directives: Vec<Directive>,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// One directive per agent.
///
/// The first surviving broadcast to an active agent wins. When nothing
/// survives the norms, a generic directive goes to the factory selection.
pub fn plan_cycle_broadcasts(input: &PlanBroadcastInput<'_>) -> PlannedBroadcasts {
    let active: HashSet<&str> = input.active_agent_ids.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut directives = Vec::new();

    for broadcast in input.sanitized {
        let to = broadcast.to.as_str();
        if !active.contains(to) || broadcast.message.trim().is_empty() || !seen.insert(to) {
            continue;
        }
        let why = input
            .output
            .top_leverage
            .iter()
            .find(|item| item.assignee == to)
            .map(|item| item.why.as_str())
            .filter(|why| !why.is_empty())
            .unwrap_or(DEFAULT_WHY);
        directives.push(Directive {
            to: to.to_string(),
            message: broadcast.message.clone(),
            why: why.to_string(),
            expires_mins: broadcast.expires_mins,
        });
    }

    if !directives.is_empty() {
        return PlannedBroadcasts {
            directives,
            used_fallback: false,
            fallback_reason: None,
        };
    }

    let candidates = if input.factory.selected_agent_ids.is_empty() {
        input.active_agent_ids
    } else {
        input.factory.selected_agent_ids.as_slice()
    };
    let mut targets: Vec<&str> = Vec::new();
    for id in candidates {
        if targets.len() >= MAX_FALLBACK_TARGETS {
            break;
        }
        if !targets.contains(&id.as_str()) {
            targets.push(id);
        }
    }

    if targets.is_empty() {
        return PlannedBroadcasts {
            directives: Vec::new(),
            used_fallback: true,
            fallback_reason: Some("No active agents available for fallback.".to_string()),
        };
    }

    let message = fallback_message(input.objective, input.constraints);
    let why = format!("Fallback assignment from factory: {}", input.factory.reason);
    PlannedBroadcasts {
        directives: targets
            .into_iter()
            .map(|to| Directive {
                to: to.to_string(),
                message: message.clone(),
                why: why.clone(),
                expires_mins: FALLBACK_TTL_MINS,
            })
            .collect(),
        used_fallback: true,
        fallback_reason: Some(
            "No valid planning broadcasts after norms/filtering. Assigned by factory fallback."
                .to_string(),
        ),
    }
}

fn fallback_message(objective: &str, constraints: &str) -> String {
    let objective = match compact_text(objective, OBJECTIVE_CHARS) {
        text if text.is_empty() => DEFAULT_OBJECTIVE.to_string(),
        text => text,
    };
    let constraints = compact_text(constraints, CONSTRAINT_CHARS);
    if constraints.is_empty() {
        format!(
            "[Factory fallback] Execute highest-leverage step for: {objective}. Return actionable output and at least one improvement."
        )
    } else {
        format!(
            "[Factory fallback] Execute highest-leverage step for: {objective}. Respect constraints: {constraints}. Return actionable output and at least one improvement."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LeverageItem;
    use crate::tree::RiskLevel;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn selection(selected: &[&str]) -> AgentFactorySelection {
        AgentFactorySelection {
            complexity_score: 12,
            target_headcount: selected.len(),
            selected_agent_ids: ids(selected),
            reason: "Complexity 12 → target 2/3 agents".to_string(),
        }
    }

    fn output() -> CeoLlmOutput {
        CeoLlmOutput {
            cycle_summary: "summary".to_string(),
            top_leverage: vec![LeverageItem {
                title: "Ship login".to_string(),
                assignee: "swe".to_string(),
                why: "Unblocks onboarding".to_string(),
                risk: RiskLevel::Medium,
                evidence_ids: Vec::new(),
                acceptance: Vec::new(),
            }],
            broadcasts: Vec::new(),
            needs_external_data: false,
        }
    }

    fn broadcast(to: &str, message: &str) -> Broadcast {
        Broadcast {
            to: to.to_string(),
            message: message.to_string(),
            expires_mins: 30,
        }
    }

    #[test]
    fn first_broadcast_per_agent_wins() {
        let active = ids(&["swe", "pm"]);
        let factory = selection(&["swe"]);
        let output = output();
        let sanitized = vec![
            broadcast("swe", "first"),
            broadcast("swe", "second"),
            broadcast("pm", "brief it"),
        ];

        let planned = plan_cycle_broadcasts(&PlanBroadcastInput {
            objective: "goal",
            constraints: "",
            active_agent_ids: &active,
            factory: &factory,
            output: &output,
            sanitized: &sanitized,
        });

        assert!(!planned.used_fallback);
        let summary: Vec<(&str, &str, &str)> = planned
            .directives
            .iter()
            .map(|d| (d.to.as_str(), d.message.as_str(), d.why.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("swe", "first", "Unblocks onboarding"),
                ("pm", "brief it", "Top leverage item"),
            ]
        );
    }

    #[test]
    fn falls_back_to_factory_selection() {
        let active = ids(&["swe", "pm", "qa"]);
        let factory = selection(&["pm", "swe", "pm"]);
        let output = output();

        let planned = plan_cycle_broadcasts(&PlanBroadcastInput {
            objective: "  Build   the\nlogin flow ",
            constraints: "no new deps",
            active_agent_ids: &active,
            factory: &factory,
            output: &output,
            sanitized: &[],
        });

        assert!(planned.used_fallback);
        let targets: Vec<&str> = planned.directives.iter().map(|d| d.to.as_str()).collect();
        assert_eq!(targets, vec!["pm", "swe"]);
        let first = &planned.directives[0];
        assert_eq!(first.expires_mins, 90);
        assert_eq!(
            first.message,
            "[Factory fallback] Execute highest-leverage step for: Build the login flow. Respect constraints: no new deps. Return actionable output and at least one improvement."
        );
        assert!(first.why.starts_with("Fallback assignment from factory: "));
    }

    #[test]
    fn fallback_without_objective_uses_default_and_caps_targets() {
        let active: Vec<String> = (0..12).map(|i| format!("agent-{i}")).collect();
        let factory = selection(&[]);
        let output = output();

        let planned = plan_cycle_broadcasts(&PlanBroadcastInput {
            objective: "   ",
            constraints: "",
            active_agent_ids: &active,
            factory: &factory,
            output: &output,
            sanitized: &[],
        });

        assert_eq!(planned.directives.len(), MAX_FALLBACK_TARGETS);
        assert_eq!(
            planned.directives[0].message,
            "[Factory fallback] Execute highest-leverage step for: Advance current autonomous goal. Return actionable output and at least one improvement."
        );
    }

    #[test]
    fn no_agents_means_no_directives() {
        let factory = selection(&[]);
        let output = output();
        let planned = plan_cycle_broadcasts(&PlanBroadcastInput {
            objective: "goal",
            constraints: "",
            active_agent_ids: &[],
            factory: &factory,
            output: &output,
            sanitized: &[],
        });
        assert!(planned.directives.is_empty());
        assert_eq!(
            planned.fallback_reason.as_deref(),
            Some("No active agents available for fallback.")
        );
    }
}
