//! The dialogue engine — one (scenario × configuration) trial.
//!
//! Strictly sequential inside a trial: each turn's model call completes
//! (including retries) before the next begins, because the prompt for turn
//! n+1 depends on the text produced in turn n. A transcript is produced
//! even on partial failure; unfinished dialogues are marked, never dropped.

use std::time::Instant;

use tb_backend::{ChatMessage, ChatRole, RoleBinding};
use tb_domain::config::{Scenario, TutorArchitecture, TutorProfile};
use tb_domain::dialogue::{DialogueTranscript, Suggestion, TraceAction, TraceAgent};
use tb_domain::error::{Error, Result};

use crate::cancel::CancelToken;
use crate::prompts;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs / outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The resolved model roles one trial calls through.
#[derive(Clone)]
pub struct DialogueBackends {
    pub ego: RoleBinding,
    /// Absent for single-agent tutors.
    pub superego: Option<RoleBinding>,
    pub learner: RoleBinding,
}

/// Everything a finished (or failed) trial hands back to the scheduler.
#[derive(Debug)]
pub struct DialogueOutcome {
    pub transcript: DialogueTranscript,
    pub suggestions: Vec<Suggestion>,
    pub api_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Default)]
struct Counters {
    api_calls: u32,
    input_tokens: u64,
    output_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DialogueEngine {
    scenario: Scenario,
    profile: TutorProfile,
    backends: DialogueBackends,
    /// Hard cap on external turns regardless of the scenario script.
    max_turns: u32,
    cancel: CancelToken,
}

impl DialogueEngine {
    pub fn new(
        scenario: Scenario,
        profile: TutorProfile,
        backends: DialogueBackends,
        max_turns: u32,
        cancel: CancelToken,
    ) -> Self {
        Self {
            scenario,
            profile,
            backends,
            max_turns,
            cancel,
        }
    }

    /// Drive the trial to completion (or failure) and return its outcome.
    pub async fn run(self) -> DialogueOutcome {
        let started = Instant::now();
        let mut transcript = DialogueTranscript::new(
            &self.scenario.id,
            &self.profile.name,
            self.profile.tutor_architecture.as_str(),
            self.profile.learner_architecture.as_str(),
        );
        let mut counters = Counters::default();

        let outcome = self.drive(&mut transcript, &mut counters).await;
        let (success, error_message) = match outcome {
            Ok(()) => {
                transcript.completed = true;
                (true, None)
            }
            Err(e) => {
                let message = e.to_string();
                let turn = transcript.total_turns.max(1);
                transcript.push(
                    turn,
                    TraceAgent::System,
                    TraceAction::FinalOutput,
                    format!("dialogue terminated early: {message}"),
                );
                (false, Some(message))
            }
        };

        let suggestions = transcript.suggestions();
        DialogueOutcome {
            transcript,
            suggestions,
            api_calls: counters.api_calls,
            input_tokens: counters.input_tokens,
            output_tokens: counters.output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
            success,
            error_message,
        }
    }

    async fn drive(
        &self,
        transcript: &mut DialogueTranscript,
        counters: &mut Counters,
    ) -> Result<()> {
        let turn_cap = self.scenario.scripted_turns().min(self.max_turns);
        let mut learner_message = self.scenario.context.clone();
        // External conversation from the tutor's perspective.
        let mut history: Vec<ChatMessage> = Vec::new();

        for turn in 1..=turn_cap {
            transcript.push(turn, TraceAgent::User, TraceAction::ContextInput, &learner_message);
            history.push(ChatMessage::user(&learner_message));

            let reply = self.tutor_turn(turn, &history, transcript, counters).await?;
            history.push(ChatMessage::assistant(&reply));
            transcript.total_turns = turn;

            if turn == turn_cap {
                break;
            }
            let directive = self.scenario.learner_turns[(turn - 1) as usize].clone();
            learner_message = self
                .learner_turn(turn, &directive, &history, transcript, counters)
                .await?;
        }
        Ok(())
    }

    // ── Tutor side ─────────────────────────────────────────────────

    /// One tutor turn: ego draft, then (for multi-agent profiles with a
    /// revision budget) the superego review loop, then emission.
    async fn tutor_turn(
        &self,
        turn: u32,
        history: &[ChatMessage],
        transcript: &mut DialogueTranscript,
        counters: &mut Counters,
    ) -> Result<String> {
        let ego_system = prompts::tutor_ego_system(&self.scenario, self.profile.recognition);

        let (mut draft, latency) = self
            .call(&self.backends.ego, &ego_system, history.to_vec(), counters)
            .await?;
        transcript
            .push(turn, TraceAgent::Ego, TraceAction::Generate, &draft)
            .latency_ms = Some(latency);

        let rounds = self.profile.max_revision_rounds;
        let reviewed = self.profile.tutor_architecture == TutorArchitecture::EgoSuperego
            && self.backends.superego.is_some()
            && rounds > 0;

        let mut forced = false;
        if reviewed {
            let superego = self
                .backends
                .superego
                .as_ref()
                .ok_or_else(|| Error::Trial("superego binding missing".into()))?;
            let superego_system = prompts::superego_system(&self.scenario);

            for round in 1..=rounds {
                let review_messages =
                    vec![ChatMessage::user(prompts::superego_review_request(&draft))];
                let (raw_review, latency) = self
                    .call(superego, &superego_system, review_messages, counters)
                    .await?;

                let verdict = parse_review(&raw_review);
                let entry =
                    transcript.push(turn, TraceAgent::Superego, TraceAction::Review, &raw_review);
                entry.approved = Some(verdict.approved);
                entry.feedback = Some(verdict.feedback.clone());
                entry.parse_failure = verdict.parse_failure;
                entry.latency_ms = Some(latency);

                if verdict.approved {
                    break;
                }
                if round < rounds {
                    let mut revise_messages = history.to_vec();
                    revise_messages.push(ChatMessage::assistant(&draft));
                    revise_messages.push(ChatMessage::user(prompts::tutor_revision_request(
                        &verdict.feedback,
                    )));
                    let (revised, latency) = self
                        .call(&self.backends.ego, &ego_system, revise_messages, counters)
                        .await?;
                    transcript
                        .push(turn, TraceAgent::Ego, TraceAction::Revise, &revised)
                        .latency_ms = Some(latency);
                    draft = revised;
                } else {
                    // Revision budget spent; emit the last draft anyway.
                    forced = true;
                }
            }
        }

        let entry = transcript.push(turn, TraceAgent::Ego, TraceAction::FinalOutput, &draft);
        entry.forced_emission = forced;
        Ok(draft)
    }

    // ── Learner side ───────────────────────────────────────────────

    /// Produce the learner's next externally visible message.
    async fn learner_turn(
        &self,
        turn: u32,
        directive: &str,
        history: &[ChatMessage],
        transcript: &mut DialogueTranscript,
        counters: &mut Counters,
    ) -> Result<String> {
        use tb_domain::config::LearnerArchitecture;

        let system = prompts::learner_system(&self.scenario);
        let flipped = flip(history);

        let reply = match self.profile.learner_architecture {
            LearnerArchitecture::Unified => {
                let messages =
                    with_user_directive(flipped, &prompts::learner_turn_request(directive));
                let (reply, latency) = self
                    .call(&self.backends.learner, &system, messages, counters)
                    .await?;
                transcript
                    .push(turn, TraceAgent::LearnerSynthesis, TraceAction::TurnAction, &reply)
                    .latency_ms = Some(latency);
                reply
            }
            LearnerArchitecture::PsychoSplit => {
                // Impulse, critique, revision. Only the revision leaves the
                // learner's head; the tutor never sees the deliberation.
                let messages =
                    with_user_directive(flipped.clone(), &prompts::learner_psycho_initial(directive));
                let (initial, latency) = self
                    .call(&self.backends.learner, &system, messages, counters)
                    .await?;
                transcript
                    .push(
                        turn,
                        TraceAgent::LearnerEgoInitial,
                        TraceAction::Deliberation,
                        &initial,
                    )
                    .latency_ms = Some(latency);

                let critique_messages =
                    vec![ChatMessage::user(prompts::learner_psycho_critique(&initial))];
                let (critique, latency) = self
                    .call(&self.backends.learner, &system, critique_messages, counters)
                    .await?;
                transcript
                    .push(
                        turn,
                        TraceAgent::LearnerSuperego,
                        TraceAction::Deliberation,
                        &critique,
                    )
                    .latency_ms = Some(latency);

                let revision_messages = with_user_directive(
                    flipped,
                    &prompts::learner_psycho_revision(&initial, &critique),
                );
                let (revision, latency) = self
                    .call(&self.backends.learner, &system, revision_messages, counters)
                    .await?;
                transcript
                    .push(
                        turn,
                        TraceAgent::LearnerEgoRevision,
                        TraceAction::Deliberation,
                        &revision,
                    )
                    .latency_ms = Some(latency);

                transcript.push(
                    turn,
                    TraceAgent::LearnerSynthesis,
                    TraceAction::TurnAction,
                    &revision,
                );
                revision
            }
        };
        Ok(reply)
    }

    // ── Shared call path ───────────────────────────────────────────

    async fn call(
        &self,
        binding: &RoleBinding,
        system: &str,
        messages: Vec<ChatMessage>,
        counters: &mut Counters,
    ) -> Result<(String, u64)> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let (reply, attempts) = binding.call(system, &messages).await?;
        counters.api_calls += attempts;
        counters.input_tokens += u64::from(reply.usage.prompt_tokens);
        counters.output_tokens += u64::from(reply.usage.completion_tokens);
        Ok((reply.content, reply.latency_ms))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ReviewVerdict {
    approved: bool,
    feedback: String,
    parse_failure: bool,
}

/// Parse a superego review into `{approved, feedback}`.
///
/// An output that cannot be parsed into that shape counts as approval with
/// empty feedback and a `parse_failure` marker — downstream analysis uses
/// the marker to separate genuine approvals from parse-auto-approvals.
fn parse_review(raw: &str) -> ReviewVerdict {
    match tb_backend::parse::extract_json(raw) {
        Ok(v) => match v.get("approved").and_then(|a| a.as_bool()) {
            Some(approved) => ReviewVerdict {
                approved,
                feedback: v
                    .get("feedback")
                    .and_then(|f| f.as_str())
                    .unwrap_or_default()
                    .to_owned(),
                parse_failure: false,
            },
            None => ReviewVerdict {
                approved: true,
                feedback: String::new(),
                parse_failure: true,
            },
        },
        Err(_) => ReviewVerdict {
            approved: true,
            feedback: String::new(),
            parse_failure: true,
        },
    }
}

/// Swap user/assistant roles so the learner sees the conversation from its
/// own side.
fn flip(history: &[ChatMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| ChatMessage {
            role: match m.role {
                ChatRole::User => ChatRole::Assistant,
                ChatRole::Assistant => ChatRole::User,
            },
            content: m.content.clone(),
        })
        .collect()
}

/// Fold a directive into the trailing user message, keeping roles strictly
/// alternating for providers that require it.
fn with_user_directive(mut messages: Vec<ChatMessage>, directive: &str) -> Vec<ChatMessage> {
    match messages.last_mut() {
        Some(last) if last.role == ChatRole::User => {
            last.content = format!("{}\n\n{directive}", last.content);
        }
        _ => messages.push(ChatMessage::user(directive)),
    }
    messages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
