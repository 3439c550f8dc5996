//! Level-of-autonomy scoring from cumulative cycle metrics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::CycleMetrics;

const COMPLETION_WEIGHT: f64 = 40.0;
const INTERVENTION_PENALTY: f64 = 8.0;
const VIOLATION_PENALTY: f64 = 10.0;
const REWORK_WEIGHT: f64 = 18.0;

const L5_THRESHOLD: f64 = 90.0;
const L4_THRESHOLD: f64 = 75.0;

/// Raw counters. Kept as floats because callers may hand over averaged or
/// corrupted values; the scorer sanitizes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutonomyScoreInput {
    pub completed_tasks: f64,
    pub total_tasks: f64,
    pub interventions: f64,
    pub violations: f64,
    pub rework: f64,
}

impl From<CycleMetrics> for AutonomyScoreInput {
    fn from(metrics: CycleMetrics) -> Self {
        Self {
            completed_tasks: f64::from(metrics.completed_tasks),
            total_tasks: f64::from(metrics.total_tasks),
            interventions: f64::from(metrics.interventions),
            violations: f64::from(metrics.violations),
            rework: f64::from(metrics.rework),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoaLevel {
    L3,
    L4,
    L5,
}

impl fmt::Display for LoaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoaLevel::L3 => "L3",
            LoaLevel::L4 => "L4",
            LoaLevel::L5 => "L5",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutonomyScoreCard {
    /// Integer in `[0, 100]`.
    pub score: u8,
    pub level: LoaLevel,
    pub intervention_count: f64,
    pub auto_completion_rate: f64,
    pub violation_count: f64,
    pub rework_rate: f64,
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn non_negative(value: f64) -> f64 {
    finite_or_zero(value).max(0.0)
}

fn clamp01(value: f64) -> f64 {
    finite_or_zero(value).clamp(0.0, 1.0)
}

pub fn compute_autonomy_score(input: &AutonomyScoreInput) -> AutonomyScoreCard {
    let total_tasks = non_negative(input.total_tasks).max(1.0);
    let completed = non_negative(input.completed_tasks).min(total_tasks);
    let interventions = non_negative(input.interventions);
    let violations = non_negative(input.violations);

    let auto_completion_rate = clamp01(completed / total_tasks);
    let rework_rate = clamp01(non_negative(input.rework) / total_tasks);

    let raw = 100.0
        - (1.0 - auto_completion_rate) * COMPLETION_WEIGHT
        - interventions * INTERVENTION_PENALTY
        - violations * VIOLATION_PENALTY
        - rework_rate * REWORK_WEIGHT;
    let raw = finite_or_zero(raw).clamp(0.0, 100.0);

    // The level is decided on the unrounded score.
    let level = if raw >= L5_THRESHOLD && interventions == 0.0 && violations == 0.0 {
        LoaLevel::L5
    } else if raw >= L4_THRESHOLD {
        LoaLevel::L4
    } else {
        LoaLevel::L3
    };

    AutonomyScoreCard {
        score: raw.round() as u8,
        level,
        intervention_count: interventions,
        auto_completion_rate,
        violation_count: violations,
        rework_rate,
    }
}
