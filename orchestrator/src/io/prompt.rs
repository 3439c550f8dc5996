//! Prompt builder for planning and agent calls.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed order and the last remaining section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::context::CycleContext;
use crate::core::planner::Directive;

const PLANNING_TEMPLATE: &str = include_str!("prompts/ceo.md");
const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");

/// Planning sections dropped first when over budget.
const PLANNING_DROP_ORDER: [&str; 4] = ["evidence", "agents", "broadcasts", "plan"];
const AGENT_DROP_ORDER: [&str; 1] = ["frame"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern should be valid")
});

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planning", PLANNING_TEMPLATE)
            .context("load planning template")?;
        env.add_template("agent", AGENT_TEMPLATE)
            .context("load agent template")?;
        Ok(Self { env })
    }

    fn render_planning(&self, input: &PlanningPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("planning")?;
        let context = input.context;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            constraints => non_blank(input.constraints),
            verification => non_blank(input.verification),
            roster => input.roster,
            factory_reason => non_blank(input.factory_reason),
            history => context.history.trim(),
            plan => non_blank(&context.plan),
            broadcasts => non_blank(&context.broadcasts),
            agents => non_blank(&context.agents),
            evidence => non_blank(&context.evidence),
        })?;
        Ok(rendered)
    }

    fn render_agent(&self, input: &AgentPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("agent")?;
        let directive = input.directive;
        let rendered = template.render(context! {
            agent_id => directive.to.as_str(),
            norm_profile => input.norm_profile,
            message => directive.message.trim(),
            why => non_blank(&directive.why),
            expires_mins => directive.expires_mins,
            goal => input.goal.trim(),
            constraints => non_blank(input.constraints),
        })?;
        Ok(rendered)
    }
}

fn non_blank(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|s| !s.is_empty())
}

/// Inputs for the single planning call of a cycle.
#[derive(Debug, Clone, Copy)]
pub struct PlanningPromptInput<'a> {
    pub goal: &'a str,
    pub constraints: &'a str,
    pub verification: &'a str,
    /// Agents the planner may direct this cycle.
    pub roster: &'a [String],
    pub factory_reason: &'a str,
    pub context: &'a CycleContext,
}

/// Inputs for one agent turn.
#[derive(Debug, Clone, Copy)]
pub struct AgentPromptInput<'a> {
    pub directive: &'a Directive,
    pub norm_profile: &'a str,
    pub goal: &'a str,
    pub constraints: &'a str,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    if total_len(sections) <= budget {
        return;
    }

    for key in drop_order {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(rest));
    let before_len = last.content.len();
    if before_len > allowed {
        let keep = allowed.saturating_sub(TRUNCATION_MARKER.len());
        let cut = floor_char_boundary(&last.content, keep);
        last.content.truncate(cut);
        if allowed > TRUNCATION_MARKER.len() {
            last.content.push_str(TRUNCATION_MARKER);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(value: &str, mut index: usize) -> usize {
    if index >= value.len() {
        return value.len();
    }
    while !value.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_planning(&self, input: &PlanningPromptInput<'_>) -> Result<PromptPack> {
        let rendered = PromptEngine::new()?
            .render_planning(input)
            .context("render planning prompt")?;
        Ok(self.pack(&rendered, &PLANNING_DROP_ORDER))
    }

    pub fn build_agent(&self, input: &AgentPromptInput<'_>) -> Result<PromptPack> {
        let rendered = PromptEngine::new()?
            .render_agent(input)
            .context("render agent prompt")?;
        Ok(self.pack(&rendered, &AGENT_DROP_ORDER))
    }

    fn pack(&self, rendered: &str, drop_order: &[&str]) -> PromptPack {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes, drop_order);
        PromptPack {
            content: render_sections(&sections),
        }
    }
}

/// A rendered prompt ready to send to the collaborator.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_context() -> CycleContext {
        CycleContext {
            plan: "## Plan\nNo plan yet.".to_string(),
            evidence: "## Recent evidence\n- ✓ [test_result] unit: 12 passed".to_string(),
            agents: "## Agents\n- swe: idle".to_string(),
            history: "## Recent cycles\nDo not repeat directives.".to_string(),
            broadcasts: "## Active broadcasts\nNone.".to_string(),
        }
    }

    fn roster() -> Vec<String> {
        vec!["pm".to_string(), "swe".to_string()]
    }

    /// Sections appear in a stable order: contract, frame, roster, history, then state.
    #[test]
    fn planning_prompt_ordering_is_stable() {
        let context = cycle_context();
        let roster = roster();
        let pack = PromptBuilder::new(40_000)
            .build_planning(&PlanningPromptInput {
                goal: "Ship login",
                constraints: "no new deps",
                verification: "cargo test",
                roster: &roster,
                factory_reason: "Complexity 5 → target 2/2 agents",
                context: &context,
            })
            .expect("render");
        let content = pack.render();

        let positions: Vec<usize> = [
            "### Planning Contract\n",
            "### Frame\n",
            "### Roster\n",
            "### History\n",
            "### Plan\n",
            "### Broadcasts\n",
            "### Agents\n",
            "### Evidence\n",
        ]
        .iter()
        .map(|heading| content.find(heading).expect(heading))
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(content.contains("role: ceo"));
        assert!(content.contains("constraints: no new deps"));
        assert!(content.contains("- swe"));
    }

    /// Over budget, state sections go first while the history block stays.
    #[test]
    fn budget_drops_state_before_history() {
        let mut context = cycle_context();
        context.evidence = "e".repeat(5_000);
        context.agents = "a".repeat(5_000);
        let roster = roster();
        let pack = PromptBuilder::new(3_000)
            .build_planning(&PlanningPromptInput {
                goal: "Ship login",
                constraints: "",
                verification: "",
                roster: &roster,
                factory_reason: "",
                context: &context,
            })
            .expect("render");
        let content = pack.render();

        assert!(!content.contains("### Evidence"));
        assert!(!content.contains("### Agents"));
        assert!(content.contains("### History"));
        assert!(content.contains("Do not repeat directives."));
        assert!(!content.contains("constraints:"));
    }

    #[test]
    fn agent_prompt_names_agent_and_directive() {
        let directive = Directive {
            to: "swe".to_string(),
            message: "Build the login form".to_string(),
            why: "Unblocks onboarding".to_string(),
            expires_mins: 45,
        };
        let pack = PromptBuilder::new(40_000)
            .build_agent(&AgentPromptInput {
                directive: &directive,
                norm_profile: "strict",
                goal: "Ship login",
                constraints: "",
            })
            .expect("render");
        let content = pack.render();

        assert!(content.contains("agent_id: swe\n"));
        assert!(content.contains("norm_profile: strict"));
        assert!(content.contains("Build the login form"));
        assert!(content.contains("expires in: 45 minutes"));
        assert!(!content.contains("role: ceo"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![ParsedSection {
            key: "contract".to_string(),
            required: true,
            content: "é".repeat(100),
        }];
        apply_budget(&mut sections, 51, &[]);
        assert!(sections[0].content.ends_with("[truncated]"));
        assert!(sections[0].content.len() <= 51);
    }
}
