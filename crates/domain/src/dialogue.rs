//! Dialogue transcript model.
//!
//! A [`DialogueTranscript`] is the full record of one trial: every agent
//! utterance and every internal deliberation step, in emission order. It is
//! written once to the transcript store and read-only afterwards.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace entry tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which agent produced a trace entry.
///
/// Unknown values deserialize to [`TraceAgent::Unknown`] so transcripts
/// written by a newer harness still load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAgent {
    User,
    Ego,
    Superego,
    LearnerEgoInitial,
    LearnerSuperego,
    LearnerEgoRevision,
    LearnerSynthesis,
    System,
    #[serde(other)]
    Unknown,
}

impl TraceAgent {
    /// Entries from these agents are internal deliberation, never shown to
    /// the counterpart agent.
    pub fn is_deliberation(self) -> bool {
        matches!(
            self,
            Self::Superego
                | Self::LearnerEgoInitial
                | Self::LearnerSuperego
                | Self::LearnerEgoRevision
        )
    }
}

/// What kind of step a trace entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    ContextInput,
    Generate,
    Revise,
    IncorporateFeedback,
    Review,
    Deliberation,
    TurnAction,
    FinalOutput,
    #[serde(other)]
    Unknown,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One step of a dialogue, in emission order.
///
/// `index` increases monotonically within a transcript; `turn` is the
/// external turn the entry belongs to. Fields not meaningful for a given
/// agent/action pair stay `None`; payload keys this version does not know
/// are preserved verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub index: u32,
    pub turn: u32,
    pub agent: TraceAgent,
    pub action: TraceAction,
    pub content: String,
    /// Superego verdict (review entries only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    /// Superego feedback text (review entries only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Set when the revision budget ran out and the draft was emitted anyway.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced_emission: bool,
    /// Set when the model output could not be parsed into the expected shape
    /// and a lenient default was applied. Queryable downstream: an approval
    /// carrying this marker is not a genuine approval.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TraceEntry {
    pub fn new(index: u32, turn: u32, agent: TraceAgent, action: TraceAction, content: impl Into<String>) -> Self {
        Self {
            index,
            turn,
            agent,
            action,
            content: content.into(),
            approved: None,
            feedback: None,
            forced_emission: false,
            parse_failure: false,
            latency_ms: None,
            extra: serde_json::Map::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript + suggestions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A final tutor output captured for judging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub turn: u32,
    pub content: String,
}

/// The full record of one (scenario, configuration) trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTranscript {
    pub dialogue_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub scenario_id: String,
    pub profile_name: String,
    /// `"single"` or `"ego_superego"`.
    pub tutor_architecture: String,
    /// `"unified"` or `"psycho_split"`.
    pub learner_architecture: String,
    pub total_turns: u32,
    /// False when the dialogue terminated early (fatal backend error or
    /// cancellation); the last turn's entries are then partial.
    pub completed: bool,
    pub entries: Vec<TraceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation_analysis: Option<String>,
}

impl DialogueTranscript {
    pub fn new(scenario_id: &str, profile_name: &str, tutor_architecture: &str, learner_architecture: &str) -> Self {
        Self {
            dialogue_id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            scenario_id: scenario_id.to_owned(),
            profile_name: profile_name.to_owned(),
            tutor_architecture: tutor_architecture.to_owned(),
            learner_architecture: learner_architecture.to_owned(),
            total_turns: 0,
            completed: false,
            entries: Vec::new(),
            transformation_analysis: None,
        }
    }

    /// Append an entry, assigning the next monotonic index.
    pub fn push(&mut self, turn: u32, agent: TraceAgent, action: TraceAction, content: impl Into<String>) -> &mut TraceEntry {
        let index = self.entries.len() as u32;
        self.entries.push(TraceEntry::new(index, turn, agent, action, content));
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// The externally visible tutor outputs, one per completed turn.
    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.entries
            .iter()
            .filter(|e| e.agent == TraceAgent::Ego && e.action == TraceAction::FinalOutput)
            .map(|e| Suggestion {
                turn: e.turn,
                content: e.content.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_get_monotonic_indices() {
        let mut t = DialogueTranscript::new("s1", "p1", "single", "unified");
        t.push(1, TraceAgent::User, TraceAction::ContextInput, "hi");
        t.push(1, TraceAgent::Ego, TraceAction::Generate, "draft");
        t.push(1, TraceAgent::Ego, TraceAction::FinalOutput, "answer");
        let indices: Vec<u32> = t.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn suggestions_are_final_ego_outputs_only() {
        let mut t = DialogueTranscript::new("s1", "p1", "ego_superego", "unified");
        t.push(1, TraceAgent::User, TraceAction::ContextInput, "hi");
        t.push(1, TraceAgent::Ego, TraceAction::Generate, "draft");
        t.push(1, TraceAgent::Superego, TraceAction::Review, "looks fine");
        t.push(1, TraceAgent::Ego, TraceAction::FinalOutput, "answer one");
        t.push(2, TraceAgent::Ego, TraceAction::FinalOutput, "answer two");
        let suggestions = t.suggestions();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].content, "answer one");
        assert_eq!(suggestions[1].turn, 2);
    }

    #[test]
    fn serde_round_trip_is_identity() {
        let mut t = DialogueTranscript::new("s1", "cell_1_base_single_unified", "single", "unified");
        t.push(1, TraceAgent::User, TraceAction::ContextInput, "context");
        let entry = t.push(1, TraceAgent::Superego, TraceAction::Review, "");
        entry.approved = Some(true);
        entry.parse_failure = true;
        t.total_turns = 1;
        t.completed = true;

        let json = serde_json::to_string(&t).unwrap();
        let back: DialogueTranscript = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dialogue_id, t.dialogue_id);
        assert_eq!(back.entries.len(), 2);
        assert_eq!(back.entries[1].approved, Some(true));
        assert!(back.entries[1].parse_failure);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn unknown_tags_are_preserved_as_opaque() {
        let json = r#"{
            "index": 0, "turn": 1,
            "agent": "oracle", "action": "prophesy",
            "content": "42", "certainty": 0.9
        }"#;
        let entry: TraceEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.agent, TraceAgent::Unknown);
        assert_eq!(entry.action, TraceAction::Unknown);
        assert_eq!(entry.extra.get("certainty").and_then(|v| v.as_f64()), Some(0.9));
    }

    #[test]
    fn deliberation_agents_classified() {
        assert!(TraceAgent::Superego.is_deliberation());
        assert!(TraceAgent::LearnerEgoInitial.is_deliberation());
        assert!(TraceAgent::LearnerSuperego.is_deliberation());
        assert!(!TraceAgent::Ego.is_deliberation());
        assert!(!TraceAgent::LearnerSynthesis.is_deliberation());
        assert!(!TraceAgent::User.is_deliberation());
    }
}
