//! Run and trial-result records — the rows the evaluation store persists.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One evaluation run: a plan of scenarios × configurations × replications.
///
/// `total_scenarios` and `total_configurations` are fixed at creation; a
/// resume never inflates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub description: String,
    pub total_scenarios: u32,
    pub total_configurations: u32,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Generator pid, env overrides, and the expanded plan — everything
    /// resume/rejudge need to reconstruct the original context.
    pub metadata: serde_json::Value,
}

impl Run {
    pub fn total_tests(&self) -> u32 {
        self.total_scenarios * self.total_configurations
    }

    /// Date-stamped, human-readable run id, e.g. `run-20260801-143502`.
    pub fn generate_id(now: DateTime<Utc>) -> String {
        format!("run-{}", now.format("%Y%m%d-%H%M%S"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factorial cell coordinates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coordinates of one cell in the 2×2×2 factorial design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCoord {
    /// Tutor prompt includes recognition-oriented instructions.
    pub recognition: bool,
    /// Tutor is an ego/superego pair rather than a single agent.
    pub tutor_multi: bool,
    /// Learner runs the psycho-split architecture.
    pub learner_psycho: bool,
}

impl CellCoord {
    /// Cell index in 1..=8. Recognition is the high bit, learner the low:
    /// `cell_1` = (0,0,0), `cell_8` = (1,1,1).
    pub fn index(self) -> u8 {
        1 + (self.recognition as u8) * 4 + (self.tutor_multi as u8) * 2 + self.learner_psycho as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        if !(1..=8).contains(&index) {
            return None;
        }
        let bits = index - 1;
        Some(Self {
            recognition: bits & 4 != 0,
            tutor_multi: bits & 2 != 0,
            learner_psycho: bits & 1 != 0,
        })
    }

    /// Canonical profile name, e.g. `cell_1_base_single_unified`.
    pub fn label(self) -> String {
        format!(
            "cell_{}_{}_{}_{}",
            self.index(),
            if self.recognition { "recog" } else { "base" },
            if self.tutor_multi { "multi" } else { "single" },
            if self.learner_psycho { "psych" } else { "unified" },
        )
    }

    /// Grouping key used by the factorial cell query, e.g. `"101"`.
    pub fn key(self) -> String {
        format!(
            "{}{}{}",
            self.recognition as u8, self.tutor_multi as u8, self.learner_psycho as u8
        )
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (1..=8).filter_map(Self::from_index)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trial result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A judged score for one rubric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub reasoning: String,
}

/// The outcome of one trial, as persisted.
///
/// Natural key: `(run_id, scenario_id, profile_name, attempt)`. The same key
/// may appear in multiple rows — rejudging appends by default so inter-judge
/// reliability stays measurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// Surrogate row id; `None` until stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub run_id: String,
    pub scenario_id: String,
    pub scenario_name: String,
    pub profile_name: String,
    /// Replication ordinal within the plan, starting at 1.
    pub attempt: u32,
    pub provider: String,
    pub ego_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superego_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue_id: Option<String>,
    pub latency_ms: u64,
    pub api_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The run was invoked with `--skip-rubric`; null scores are expected.
    #[serde(default)]
    pub skip_rubric: bool,
    /// Per-dimension rubric scores; empty until judged.
    #[serde(default)]
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    /// Null means "not yet judged", distinct from a judged zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell: Option<CellCoord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualitative_assessment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blinded_assessment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrialResult {
    pub fn natural_key(&self) -> (String, String, String, u32) {
        (
            self.run_id.clone(),
            self.scenario_id.clone(),
            self.profile_name.clone(),
            self.attempt,
        )
    }

    /// Whether this result still needs a judge pass.
    pub fn needs_judging(&self) -> bool {
        self.success && self.overall_score.is_none()
    }
}
