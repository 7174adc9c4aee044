//! Structured-output extraction.
//!
//! Models are asked for JSON but do not reliably produce bare JSON. The
//! ladder is: strict parse, then the first fenced ```json block, then the
//! first balanced `{…}` region. Callers decide what a final failure means —
//! the superego step auto-approves with a marker, the ego and judge steps
//! fail the trial.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use tb_domain::error::{Error, Result};

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // ```json ... ``` or bare ``` ... ``` fences, non-greedy body.
        Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static regex")
    })
}

/// Extract a JSON object from model output, leniently.
pub fn extract_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();

    // 1. The whole completion is valid JSON.
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Ok(v);
        }
    }

    // 2. A fenced code block containing valid JSON.
    for caps in fence_re().captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(v) = serde_json::from_str::<Value>(body.as_str().trim()) {
                if v.is_object() {
                    return Ok(v);
                }
            }
        }
    }

    // 3. The first balanced `{…}` region.
    if let Some(candidate) = first_brace_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            if v.is_object() {
                return Ok(v);
            }
        }
    }

    Err(Error::Parse(format!(
        "no JSON object found in model output ({} chars)",
        raw.len()
    )))
}

/// Find the first balanced top-level `{…}` slice, respecting strings.
fn first_brace_block(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
