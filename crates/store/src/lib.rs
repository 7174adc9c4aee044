//! Persistence for the evaluation harness.
//!
//! Three stores, three durability styles:
//! - [`EvalStore`]: runs, results, and interaction evaluations in SQLite —
//!   short transactions, append-mostly.
//! - [`TranscriptStore`]: one immutable JSON document per dialogue.
//! - [`ProgressLog`]: a per-run append-only JSONL journal other processes
//!   tail without touching the database.

pub mod db;
pub mod progress;
pub mod transcripts;

pub use db::{EvalStore, RunSummary, ScoreColumn};
pub use progress::{CellOutcome, ProgressGrid, ProgressLog, read_progress_events};
pub use transcripts::TranscriptStore;
