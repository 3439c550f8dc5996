//! Admission control for cycles, broadcasts, and agent outputs.
//!
//! Every function here is pure: inputs in, a list of [`NormDecision`]s out.
//! A `deny` blocks the thing it is attached to; a `revise` never blocks and
//! only asks for a correction on a later turn.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::broadcast::Broadcast;
use crate::core::types::{AgentAction, AgentOutput, ProposedBroadcast, RepoAction};

const ENGINEERING_PREFIX: &str = "swe";
const FRONTEND_ROLE: &str = "frontend";
const WRITE_CODE_ACTION: &str = "write_code";

pub const MIN_BROADCAST_TTL_MINS: u32 = 5;
pub const MAX_BROADCAST_TTL_MINS: u32 = 240;
const DEFAULT_BROADCAST_TTL_MINS: f64 = 60.0;

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)sk-[a-z0-9\-_]{16,}",
        r"(?i)api[_-]?key\s*[:=]",
        r"(?i)BEGIN [A-Z ]*PRIVATE KEY",
        r"(?i)xox[baprs]-[a-z0-9-]{10,}",
        r"(?i)ghp_[a-z0-9]{20,}",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("secret pattern should be valid"))
    .collect()
});

/// The closed set of norm rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormRuleId {
    FrameLockRequired,
    ActiveAgentRequired,
    MaxCostPerCycle,
    BroadcastTargetActive,
    BroadcastMessageRequired,
    BroadcastTtlRange,
    NoSecretCommit,
    TestBeforeMerge,
    WriteCodeDiffRequired,
}

impl NormRuleId {
    pub const ALL: [NormRuleId; 9] = [
        NormRuleId::FrameLockRequired,
        NormRuleId::ActiveAgentRequired,
        NormRuleId::MaxCostPerCycle,
        NormRuleId::BroadcastTargetActive,
        NormRuleId::BroadcastMessageRequired,
        NormRuleId::BroadcastTtlRange,
        NormRuleId::NoSecretCommit,
        NormRuleId::TestBeforeMerge,
        NormRuleId::WriteCodeDiffRequired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NormRuleId::FrameLockRequired => "frame_lock_required",
            NormRuleId::ActiveAgentRequired => "active_agent_required",
            NormRuleId::MaxCostPerCycle => "max_cost_per_cycle",
            NormRuleId::BroadcastTargetActive => "broadcast_target_active",
            NormRuleId::BroadcastMessageRequired => "broadcast_message_required",
            NormRuleId::BroadcastTtlRange => "broadcast_ttl_range",
            NormRuleId::NoSecretCommit => "no_secret_commit",
            NormRuleId::TestBeforeMerge => "test_before_merge",
            NormRuleId::WriteCodeDiffRequired => "write_code_diff_required",
        }
    }
}

impl fmt::Display for NormRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormDecisionKind {
    Allow,
    Deny,
    Revise,
}

impl NormDecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NormDecisionKind::Allow => "allow",
            NormDecisionKind::Deny => "deny",
            NormDecisionKind::Revise => "revise",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormDecision {
    pub rule_id: NormRuleId,
    pub decision: NormDecisionKind,
    pub reason: String,
    /// Remediation hint a follow-up directive can quote directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_patch: Option<String>,
}

impl NormDecision {
    fn new(rule_id: NormRuleId, decision: NormDecisionKind, reason: impl Into<String>) -> Self {
        Self {
            rule_id,
            decision,
            reason: reason.into(),
            required_patch: None,
        }
    }

    pub fn allow(rule_id: NormRuleId, reason: impl Into<String>) -> Self {
        Self::new(rule_id, NormDecisionKind::Allow, reason)
    }

    pub fn deny(rule_id: NormRuleId, reason: impl Into<String>) -> Self {
        Self::new(rule_id, NormDecisionKind::Deny, reason)
    }

    pub fn revise(rule_id: NormRuleId, reason: impl Into<String>) -> Self {
        Self::new(rule_id, NormDecisionKind::Revise, reason)
    }

    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        self.required_patch = Some(patch.into());
        self
    }
}

/// True iff no decision is a `deny`.
pub fn is_norm_allowed(decisions: &[NormDecision]) -> bool {
    !decisions
        .iter()
        .any(|d| d.decision == NormDecisionKind::Deny)
}

/// Named strictness setting controlling how violations are scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormProfile {
    Strict,
    #[default]
    Default,
    Fast,
}

impl NormProfile {
    /// Case/whitespace-insensitive; anything unrecognized is `Default`.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "strict" => NormProfile::Strict,
            "fast" => NormProfile::Fast,
            _ => NormProfile::Default,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NormProfile::Strict => "strict",
            NormProfile::Default => "default",
            NormProfile::Fast => "fast",
        }
    }
}

/// A profile-dependent agent-output violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    SecretInPayload,
    MissingCodeDiff,
    MergeWithoutChecks,
    MissingVerificationCommand,
}

impl Violation {
    pub fn rule_id(self) -> NormRuleId {
        match self {
            Violation::SecretInPayload => NormRuleId::NoSecretCommit,
            Violation::MissingCodeDiff => NormRuleId::WriteCodeDiffRequired,
            Violation::MergeWithoutChecks | Violation::MissingVerificationCommand => {
                NormRuleId::TestBeforeMerge
            }
        }
    }
}

/// The policy table: what a violation costs under each profile.
pub fn severity(profile: NormProfile, violation: Violation) -> NormDecisionKind {
    match (violation, profile) {
        (Violation::SecretInPayload, _) => NormDecisionKind::Deny,
        (Violation::MissingCodeDiff, NormProfile::Fast) => NormDecisionKind::Revise,
        (Violation::MissingCodeDiff, _) => NormDecisionKind::Deny,
        (Violation::MergeWithoutChecks, NormProfile::Fast) => NormDecisionKind::Revise,
        (Violation::MergeWithoutChecks, _) => NormDecisionKind::Deny,
        (Violation::MissingVerificationCommand, _) => NormDecisionKind::Revise,
    }
}

fn violation_decision(
    profile: NormProfile,
    violation: Violation,
    reason: String,
    patch: &str,
) -> NormDecision {
    NormDecision::new(violation.rule_id(), severity(profile, violation), reason).with_patch(patch)
}

#[derive(Debug, Clone, Copy)]
pub struct PreCycleNormInput<'a> {
    pub frame_locked: bool,
    pub goal: &'a str,
    pub active_agent_ids: &'a [String],
    pub budget_cap_usd: Option<f64>,
    pub estimated_cycle_cost_usd: Option<f64>,
}

/// Gate a cycle before it starts. The cycle may run iff [`is_norm_allowed`].
pub fn run_pre_cycle_norms(input: &PreCycleNormInput<'_>) -> Vec<NormDecision> {
    let mut decisions = Vec::new();

    if !input.frame_locked || input.goal.trim().is_empty() {
        decisions.push(
            NormDecision::deny(
                NormRuleId::FrameLockRequired,
                "Frame lock with a non-empty goal is required for autonomous cycle.",
            )
            .with_patch("Lock Frame and set goal before running auto-cycle."),
        );
    } else {
        decisions.push(NormDecision::allow(
            NormRuleId::FrameLockRequired,
            "Frame lock is active.",
        ));
    }

    if input.active_agent_ids.is_empty() {
        decisions.push(
            NormDecision::deny(
                NormRuleId::ActiveAgentRequired,
                "No active agent employees available.",
            )
            .with_patch("Activate at least one agent in the roster."),
        );
    } else {
        decisions.push(NormDecision::allow(
            NormRuleId::ActiveAgentRequired,
            format!("{} active agents available.", input.active_agent_ids.len()),
        ));
    }

    // Only evaluated when both a positive cap and an estimate are known.
    if let (Some(cap), Some(estimate)) = (input.budget_cap_usd, input.estimated_cycle_cost_usd) {
        if cap > 0.0 {
            if estimate > cap {
                decisions.push(
                    NormDecision::deny(
                        NormRuleId::MaxCostPerCycle,
                        format!(
                            "Estimated cycle cost ${estimate:.2} exceeds cap ${cap:.2}."
                        ),
                    )
                    .with_patch("Reduce scope or lower parallelism before next cycle."),
                );
            } else {
                decisions.push(NormDecision::allow(
                    NormRuleId::MaxCostPerCycle,
                    format!("Estimated cost within cap (${estimate:.2} / ${cap:.2})."),
                ));
            }
        }
    }

    decisions
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastNormResult {
    pub broadcasts: Vec<Broadcast>,
    pub decisions: Vec<NormDecision>,
}

/// Sanitize proposed broadcasts in input order.
///
/// Broadcasts to inactive agents or with blank messages are dropped; TTLs are
/// rounded and clamped to `[5, 240]` minutes.
pub fn run_broadcast_norms(
    broadcasts: &[ProposedBroadcast],
    active_agent_ids: &[String],
) -> BroadcastNormResult {
    let active: HashSet<&str> = active_agent_ids.iter().map(String::as_str).collect();
    let mut decisions = Vec::new();
    let mut sanitized = Vec::new();

    for proposed in broadcasts {
        if !active.contains(proposed.to.as_str()) {
            decisions.push(NormDecision::revise(
                NormRuleId::BroadcastTargetActive,
                format!("Removed broadcast target \"{}\" (not active).", proposed.to),
            ));
            continue;
        }

        let message = proposed.message.trim();
        if message.is_empty() {
            decisions.push(NormDecision::revise(
                NormRuleId::BroadcastMessageRequired,
                format!("Removed empty broadcast for \"{}\".", proposed.to),
            ));
            continue;
        }

        let expires_mins = clamp_ttl(proposed.expires_mins);
        if f64::from(expires_mins) != proposed.expires_mins {
            decisions.push(NormDecision::revise(
                NormRuleId::BroadcastTtlRange,
                format!(
                    "Adjusted expiresMins for \"{}\" to {}.",
                    proposed.to, expires_mins
                ),
            ));
        }

        decisions.push(NormDecision::allow(
            NormRuleId::BroadcastTargetActive,
            format!("Broadcast target \"{}\" is active.", proposed.to),
        ));

        sanitized.push(Broadcast {
            to: proposed.to.clone(),
            message: message.to_string(),
            expires_mins,
        });
    }

    BroadcastNormResult {
        broadcasts: sanitized,
        decisions,
    }
}

fn clamp_ttl(raw: f64) -> u32 {
    let raw = if raw.is_finite() {
        raw
    } else {
        DEFAULT_BROADCAST_TTL_MINS
    };
    raw.round().clamp(
        f64::from(MIN_BROADCAST_TTL_MINS),
        f64::from(MAX_BROADCAST_TTL_MINS),
    ) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct AgentOutputNormInput<'a> {
    pub agent_id: &'a str,
    pub norm_profile: Option<&'a str>,
    pub output: &'a str,
    pub actions: &'a [AgentAction],
    pub improvements: &'a [String],
    pub repo_actions: &'a [RepoAction],
}

impl<'a> AgentOutputNormInput<'a> {
    pub fn from_output(
        agent_id: &'a str,
        norm_profile: Option<&'a str>,
        output: &'a AgentOutput,
    ) -> Self {
        Self {
            agent_id,
            norm_profile,
            output: &output.output,
            actions: &output.actions,
            improvements: &output.improvements,
            repo_actions: &output.repo_actions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentOutputNormResult {
    pub allowed: bool,
    pub profile: NormProfile,
    pub decisions: Vec<NormDecision>,
}

impl AgentOutputNormResult {
    pub fn count(&self, kind: NormDecisionKind) -> u32 {
        self.decisions.iter().filter(|d| d.decision == kind).count() as u32
    }
}

/// Gate an already-parsed agent output before its actions take effect.
pub fn run_agent_output_norms(input: &AgentOutputNormInput<'_>) -> AgentOutputNormResult {
    let mut decisions = Vec::new();
    let profile = NormProfile::normalize(input.norm_profile);

    if contains_secret_like_text(&secret_scan_payload(input)) {
        decisions.push(violation_decision(
            profile,
            Violation::SecretInPayload,
            "Potential secret/token detected in agent output payload.".to_string(),
            "Remove secrets and use env references before continuing.",
        ));
    } else {
        decisions.push(NormDecision::allow(
            NormRuleId::NoSecretCommit,
            "No secret-like payload found.",
        ));
    }

    let engineering = is_engineering_agent(input.agent_id);
    if engineering {
        let missing_diff = input
            .actions
            .iter()
            .filter(|a| a.kind == WRITE_CODE_ACTION)
            .filter(|a| a.code_diff.as_deref().is_none_or(|d| d.trim().is_empty()))
            .count();
        if missing_diff > 0 {
            decisions.push(violation_decision(
                profile,
                Violation::MissingCodeDiff,
                format!(
                    "{missing_diff} write_code action(s) missing codeDiff. (profile: {})",
                    profile.as_str()
                ),
                "Include unified diff in codeDiff for every write_code action.",
            ));
        } else {
            decisions.push(NormDecision::allow(
                NormRuleId::WriteCodeDiffRequired,
                "All write_code actions include codeDiff.",
            ));
        }
    }

    let has_merge = input
        .repo_actions
        .iter()
        .any(|a| a.kind == RepoAction::MERGE);
    if has_merge {
        if has_required_check_commands(input.repo_actions) {
            decisions.push(NormDecision::allow(
                NormRuleId::TestBeforeMerge,
                "merge_pr has lint/build/test command evidence.",
            ));
        } else {
            decisions.push(violation_decision(
                profile,
                Violation::MergeWithoutChecks,
                format!(
                    "merge_pr requested without lint/build/test command evidence. (profile: {})",
                    profile.as_str()
                ),
                "Run lint, build, and test before merge.",
            ));
        }
    }

    if profile == NormProfile::Strict && engineering {
        let has_command = input
            .repo_actions
            .iter()
            .any(|a| a.kind == RepoAction::RUN_COMMAND);
        if !has_command {
            decisions.push(violation_decision(
                profile,
                Violation::MissingVerificationCommand,
                "Strict profile expects at least one run_bash verification command.".to_string(),
                "Add at least one validation command (lint/build/test).",
            ));
        }
    }

    AgentOutputNormResult {
        allowed: is_norm_allowed(&decisions),
        profile,
        decisions,
    }
}

pub fn is_engineering_agent(agent_id: &str) -> bool {
    agent_id.starts_with(ENGINEERING_PREFIX) || agent_id == FRONTEND_ROLE
}

fn secret_scan_payload(input: &AgentOutputNormInput<'_>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(1 + input.improvements.len() + input.actions.len());
    parts.push(input.output.to_string());
    parts.extend(input.improvements.iter().cloned());
    parts.extend(input.actions.iter().map(|a| {
        format!(
            "{}\n{}\n{}",
            a.kind,
            a.detail,
            a.code_diff.as_deref().unwrap_or_default()
        )
    }));
    parts.join("\n")
}

fn contains_secret_like_text(text: &str) -> bool {
    !text.is_empty() && SECRET_PATTERNS.iter().any(|rx| rx.is_match(text))
}

/// Each keyword may be satisfied by a different command.
///
/// Matching is plain substring search, so a path that merely contains "test"
/// counts as a test run.
fn has_required_check_commands(repo_actions: &[RepoAction]) -> bool {
    let commands: Vec<String> = repo_actions
        .iter()
        .filter_map(RepoAction::command)
        .map(str::to_lowercase)
        .collect();
    ["lint", "build", "test"]
        .iter()
        .all(|keyword| commands.iter().any(|c| c.contains(keyword)))
}
