//! The judge — scores a completed transcript against the scenario rubric.
//!
//! The judge is a distinct model role. Its output contract is JSON; parsing
//! runs the same ladder as every structured output (strict, fenced, first
//! brace block) and a final parse failure is an error the scheduler turns
//! into "recorded but not yet judged", never a failed trial.
//!
//! Score derivation is data-driven: `overall_score` is the weighted mean of
//! all dimensions, `base_score` of the non-recognition dimensions, and
//! `recognition_score` of the recognition dimensions, each normalised by
//! the weights actually present. Weights come from the rubric, not code.

use std::collections::BTreeMap;

use tb_backend::{parse::extract_json, ChatMessage, RoleBinding};
use tb_domain::config::{Rubric, Scenario};
use tb_domain::dialogue::{DialogueTranscript, Suggestion, TraceAction, TraceAgent};
use tb_domain::error::{Error, Result};
use tb_domain::record::DimensionScore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    /// Presence verdict per required element.
    pub required_elements: BTreeMap<String, bool>,
    /// Presence verdict per forbidden element (true = the tutor slipped).
    pub forbidden_elements: BTreeMap<String, bool>,
    pub summary: String,
    pub overall_score: f64,
    pub base_score: f64,
    pub recognition_score: f64,
    pub judge_model: String,
    pub api_calls: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Judge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Judge {
    binding: RoleBinding,
}

impl Judge {
    pub fn new(binding: RoleBinding) -> Self {
        Self { binding }
    }

    pub fn model(&self) -> &str {
        self.binding.model()
    }

    /// Score one transcript.
    pub async fn score(
        &self,
        scenario: &Scenario,
        transcript: &DialogueTranscript,
        suggestions: &[Suggestion],
    ) -> Result<JudgeVerdict> {
        let system = judge_system(scenario);
        let payload = judge_payload(transcript, suggestions);
        let (reply, api_calls) = self
            .binding
            .call(&system, &[ChatMessage::user(payload)])
            .await?;

        let parsed = extract_json(&reply.content)?;
        let (dimension_scores, required_elements, forbidden_elements, summary) =
            parse_verdict(&scenario.rubric, &parsed)?;
        let (overall_score, base_score, recognition_score) =
            derive_scores(&scenario.rubric, &dimension_scores);

        Ok(JudgeVerdict {
            dimension_scores,
            required_elements,
            forbidden_elements,
            summary,
            overall_score,
            base_score,
            recognition_score,
            judge_model: reply.model,
            api_calls,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn judge_system(scenario: &Scenario) -> String {
    let rubric = &scenario.rubric;
    let mut dims = String::new();
    for d in &rubric.dimensions {
        dims.push_str(&format!("- {}: {}\n", d.name, d.description));
    }
    let mut prompt = format!(
        "You are an impartial judge scoring one tutoring dialogue.\n\
         Expected tutoring behaviour: {}\n\
         Score each dimension as an integer from 0 to {}:\n{dims}",
        rubric.expected_behaviour, rubric.max_score
    );
    if !rubric.required_elements.is_empty() {
        prompt.push_str("Required elements (report presence per element):\n");
        for el in &rubric.required_elements {
            prompt.push_str(&format!("- {el}\n"));
        }
    }
    if !rubric.forbidden_elements.is_empty() {
        prompt.push_str("Forbidden elements (report presence per element):\n");
        for el in &rubric.forbidden_elements {
            prompt.push_str(&format!("- {el}\n"));
        }
    }
    prompt.push_str(
        "Respond with JSON only:\n\
         {\"dimensions\": {\"<name>\": {\"score\": <int>, \"reasoning\": \"...\"}},\n\
          \"required_elements\": {\"<element>\": true|false},\n\
          \"forbidden_elements\": {\"<element>\": true|false},\n\
          \"summary\": \"...\"}",
    );
    prompt
}

/// Render the externally visible dialogue plus the captured suggestions.
/// Internal deliberation never reaches the judge.
fn judge_payload(transcript: &DialogueTranscript, suggestions: &[Suggestion]) -> String {
    let mut payload = String::from("Dialogue:\n");
    for entry in &transcript.entries {
        match (entry.agent, entry.action) {
            (TraceAgent::User, TraceAction::ContextInput) => {
                payload.push_str(&format!("Learner: {}\n", entry.content));
            }
            (TraceAgent::Ego, TraceAction::FinalOutput) => {
                payload.push_str(&format!("Tutor: {}\n", entry.content));
            }
            _ => {}
        }
    }
    payload.push_str("\nTutor outputs under evaluation:\n");
    for s in suggestions {
        payload.push_str(&format!("[turn {}] {}\n", s.turn, s.content));
    }
    payload
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict parsing + score derivation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type ParsedVerdict = (
    BTreeMap<String, DimensionScore>,
    BTreeMap<String, bool>,
    BTreeMap<String, bool>,
    String,
);

fn parse_verdict(rubric: &Rubric, parsed: &serde_json::Value) -> Result<ParsedVerdict> {
    let dims_json = parsed
        .get("dimensions")
        .and_then(|v| v.as_object())
        .ok_or_else(|| Error::Parse("judge output lacks a dimensions object".into()))?;

    let mut dimension_scores = BTreeMap::new();
    for dim in &rubric.dimensions {
        match dims_json.get(&dim.name) {
            Some(v) => {
                let score = v
                    .get("score")
                    .and_then(|s| s.as_f64())
                    .ok_or_else(|| {
                        Error::Parse(format!("dimension '{}' has no numeric score", dim.name))
                    })?
                    .clamp(0.0, rubric.max_score);
                let reasoning = v
                    .get("reasoning")
                    .and_then(|r| r.as_str())
                    .unwrap_or_default()
                    .to_owned();
                dimension_scores.insert(dim.name.clone(), DimensionScore { score, reasoning });
            }
            None => {
                dimension_scores.insert(
                    dim.name.clone(),
                    DimensionScore {
                        score: 0.0,
                        reasoning: "not scored by judge".into(),
                    },
                );
            }
        }
    }

    let element_map = |key: &str| -> BTreeMap<String, bool> {
        parsed
            .get(key)
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
                    .collect()
            })
            .unwrap_or_default()
    };

    let summary = parsed
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();

    Ok((
        dimension_scores,
        element_map("required_elements"),
        element_map("forbidden_elements"),
        summary,
    ))
}

/// Weighted means over the rubric's dimensions: all of them for overall,
/// split by the recognition flag for the two sub-scores. A sub-score with
/// no dimensions is 0.
pub fn derive_scores(
    rubric: &Rubric,
    scores: &BTreeMap<String, DimensionScore>,
) -> (f64, f64, f64) {
    let weighted_mean = |recognition: Option<bool>| -> f64 {
        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for dim in &rubric.dimensions {
            if recognition.is_some_and(|r| dim.recognition != r) {
                continue;
            }
            if let Some(ds) = scores.get(&dim.name) {
                sum += ds.score * dim.weight;
                weight_sum += dim.weight;
            }
        }
        if weight_sum == 0.0 {
            0.0
        } else {
            sum / weight_sum
        }
    };
    (
        weighted_mean(None),
        weighted_mean(Some(false)),
        weighted_mean(Some(true)),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
