//! Progress journal events.
//!
//! One event per line in `<logs>/eval-progress/<run_id>.jsonl`. The journal
//! is independent of the database: watchers tail it without DB contention and
//! resume can rebuild the completion grid from it alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A self-describing progress journal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Emitted once per process at run (or resume) start. Grid builders take
    /// the plan from the *first* `run_start` only; later ones from resumes
    /// never replace it.
    RunStart {
        ts: DateTime<Utc>,
        run_id: String,
        scenarios: Vec<String>,
        profiles: Vec<String>,
        total_tests: u32,
    },
    TestStart {
        ts: DateTime<Utc>,
        scenario_id: String,
        profile_name: String,
        attempt: u32,
    },
    TestComplete {
        ts: DateTime<Utc>,
        scenario_id: String,
        scenario_name: String,
        profile_name: String,
        attempt: u32,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        overall_score: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
    TestError {
        ts: DateTime<Utc>,
        scenario_id: String,
        profile_name: String,
        attempt: u32,
        error_message: String,
    },
    RunComplete {
        ts: DateTime<Utc>,
        duration_ms: u64,
    },
}

impl ProgressEvent {
    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            Self::RunStart { ts, .. }
            | Self::TestStart { ts, .. }
            | Self::TestComplete { ts, .. }
            | Self::TestError { ts, .. }
            | Self::RunComplete { ts, .. } => *ts,
        }
    }
}
