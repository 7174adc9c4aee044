//! Prompt assembly for the dialogue roles.
//!
//! The templates here define the *shape* of each role's instructions — what
//! context it sees and what output contract it must honour. Pedagogical
//! wording is deliberately plain; prompt quality is a content concern, not
//! an engine concern.

use tb_domain::config::Scenario;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System prompt for the tutor ego.
pub fn tutor_ego_system(scenario: &Scenario, recognition: bool) -> String {
    let mut prompt = format!(
        "You are a tutor working with one learner.\n\
         Situation: {}\n\
         Respond to the learner directly, in plain prose, one reply per turn. \
         Keep replies focused and conversational.",
        scenario.description
    );
    if recognition {
        prompt.push_str(
            "\nBefore teaching, explicitly acknowledge what the learner has \
             already tried, felt, or understood, in your own words.",
        );
    }
    prompt
}

/// User-side message asking the ego to revise a rejected draft.
pub fn tutor_revision_request(feedback: &str) -> String {
    format!(
        "Your internal reviewer was not satisfied with that draft.\n\
         Reviewer feedback: {feedback}\n\
         Write an improved reply to the learner. Output only the reply."
    )
}

/// System prompt for the tutor superego (the reviewer).
pub fn superego_system(scenario: &Scenario) -> String {
    format!(
        "You review a tutor's draft reply before the learner sees it.\n\
         Expected tutoring behaviour: {}\n\
         Judge whether the draft should be sent as-is. Respond with JSON only:\n\
         {{\"approved\": true|false, \"feedback\": \"what to change, if anything\"}}",
        scenario.rubric.expected_behaviour
    )
}

/// User-side message carrying the draft under review.
pub fn superego_review_request(draft: &str) -> String {
    format!("Draft reply to review:\n---\n{draft}\n---")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Learner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System prompt for the simulated learner.
pub fn learner_system(scenario: &Scenario) -> String {
    format!(
        "You are playing a learner in a tutoring conversation.\n\
         Persona: {}\n\
         Stay in character. Write only what the learner would say, one short \
         message per turn.",
        if scenario.learner_persona.is_empty() {
            "a motivated but uncertain student"
        } else {
            &scenario.learner_persona
        }
    )
}

/// Directive for the next scripted learner turn.
pub fn learner_turn_request(directive: &str) -> String {
    format!(
        "Direction for your next message: {directive}\n\
         Reply to the tutor accordingly, in character."
    )
}

/// Psycho-split learner: the impulsive first reaction.
pub fn learner_psycho_initial(directive: &str) -> String {
    format!(
        "Direction for this turn: {directive}\n\
         Give your unfiltered first reaction to the tutor's message — what \
         you immediately feel and want to say."
    )
}

/// Psycho-split learner: the self-critical pass over the first reaction.
pub fn learner_psycho_critique(initial: &str) -> String {
    format!(
        "You are the learner's inner critic. The learner's impulse was:\n\
         ---\n{initial}\n---\n\
         Note briefly what this impulse gets wrong or leaves unsaid about \
         what the learner actually needs."
    )
}

/// Psycho-split learner: fold the critique back into a revised reply.
pub fn learner_psycho_revision(initial: &str, critique: &str) -> String {
    format!(
        "Your first impulse was:\n---\n{initial}\n---\n\
         Your inner critic said:\n---\n{critique}\n---\n\
         Write the message the learner actually sends, in character, taking \
         the critique into account. Output only that message."
    )
}
