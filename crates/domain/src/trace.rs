use serde::Serialize;

/// Structured trace events emitted across all Tutorbench crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    BackendCall {
        provider: String,
        model: String,
        role: String,
        attempt: u32,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    BackendRetry {
        provider: String,
        model: String,
        reason: String,
        delay_ms: u64,
    },
    TrialStarted {
        run_id: String,
        scenario_id: String,
        profile_name: String,
        attempt: u32,
    },
    TrialCommitted {
        run_id: String,
        scenario_id: String,
        profile_name: String,
        success: bool,
        overall_score: Option<f64>,
    },
    JudgeFallback {
        run_id: String,
        scenario_id: String,
        profile_name: String,
        reason: String,
    },
    TranscriptWritten {
        dialogue_id: String,
        entries: usize,
    },
    RunResumed {
        run_id: String,
        remaining: usize,
    },
    StaleRunClosed {
        run_id: String,
        idle_minutes: i64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tb_event");
    }
}
