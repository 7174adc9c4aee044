//! Per-run progress journal.
//!
//! One writer per run (the scheduler), any number of concurrent readers.
//! Events are appended one JSON object per line and flushed to disk before
//! the append returns, so a `test_complete` in the journal implies the
//! corresponding store row is already committed. Readers skip malformed and
//! partial trailing lines.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use tb_domain::progress::ProgressEvent;
use tb_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only journal writer for one run.
pub struct ProgressLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ProgressLog {
    /// Open (creating if needed) `<dir>/<run_id>.jsonl` in append mode.
    pub fn open(dir: &Path, run_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{run_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. The line is durable (flushed and synced) before
    /// this returns.
    pub fn append(&self, event: &ProgressEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read every parseable event from a journal file.
///
/// Malformed lines (including a partial trailing line from a concurrent
/// writer or a crash) are skipped cleanly. A missing file reads as empty.
pub fn read_progress_events(path: &Path) -> Result<Vec<ProgressEvent>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut events = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ProgressEvent>(line) {
            Ok(ev) => events.push(ev),
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed progress line");
            }
        }
    }
    Ok(events)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Grid reconstruction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The latest outcome of one (scenario, profile) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellOutcome {
    /// Completed successfully; score when the trial was judged.
    Pass(Option<f64>),
    /// Completed with `success = false`.
    Fail,
    /// A `test_error` event.
    Error,
}

/// The scenario × profile completion grid, rebuilt from the journal alone.
#[derive(Debug, Clone, Default)]
pub struct ProgressGrid {
    /// Scenario ids from the first `run_start`.
    pub scenarios: Vec<String>,
    /// Profile names from the first `run_start`.
    pub profiles: Vec<String>,
    /// The plan size fixed by the first `run_start`. Later `run_start`
    /// events (resumes) never replace it.
    pub total_tests: u32,
    /// Latest outcome per (scenario_id, profile_name).
    pub cells: BTreeMap<(String, String), CellOutcome>,
    /// Count of terminal events observed, not any event's own counter.
    pub completed_events: u32,
    pub error_events: u32,
    pub run_complete: bool,
    pub duration_ms: Option<u64>,
}

impl ProgressGrid {
    pub fn from_events(events: &[ProgressEvent]) -> Self {
        let mut grid = Self::default();
        let mut plan_seen = false;
        for event in events {
            match event {
                ProgressEvent::RunStart {
                    scenarios,
                    profiles,
                    total_tests,
                    ..
                } => {
                    if !plan_seen {
                        grid.scenarios = scenarios.clone();
                        grid.profiles = profiles.clone();
                        grid.total_tests = *total_tests;
                        plan_seen = true;
                    }
                }
                ProgressEvent::TestStart { .. } => {}
                ProgressEvent::TestComplete {
                    scenario_id,
                    profile_name,
                    success,
                    overall_score,
                    ..
                } => {
                    grid.completed_events += 1;
                    let outcome = if *success {
                        CellOutcome::Pass(*overall_score)
                    } else {
                        CellOutcome::Fail
                    };
                    grid.cells
                        .insert((scenario_id.clone(), profile_name.clone()), outcome);
                }
                ProgressEvent::TestError {
                    scenario_id,
                    profile_name,
                    ..
                } => {
                    grid.error_events += 1;
                    grid.cells
                        .insert((scenario_id.clone(), profile_name.clone()), CellOutcome::Error);
                }
                ProgressEvent::RunComplete { duration_ms, .. } => {
                    grid.run_complete = true;
                    grid.duration_ms = Some(*duration_ms);
                }
            }
        }
        grid
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::from_events(&read_progress_events(path)?))
    }

    pub fn outcome(&self, scenario_id: &str, profile_name: &str) -> Option<CellOutcome> {
        self.cells
            .get(&(scenario_id.to_owned(), profile_name.to_owned()))
            .copied()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn run_start(total: u32) -> ProgressEvent {
        ProgressEvent::RunStart {
            ts: Utc::now(),
            run_id: "run-1".into(),
            scenarios: vec!["s1".into(), "s2".into()],
            profiles: vec!["p1".into(), "p2".into()],
            total_tests: total,
        }
    }

    fn complete(scenario: &str, profile: &str, success: bool, score: Option<f64>) -> ProgressEvent {
        ProgressEvent::TestComplete {
            ts: Utc::now(),
            scenario_id: scenario.into(),
            scenario_name: scenario.to_uppercase(),
            profile_name: profile.into(),
            attempt: 1,
            success,
            overall_score: score,
            latency_ms: Some(100),
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path(), "run-1").unwrap();
        log.append(&run_start(4)).unwrap();
        log.append(&complete("s1", "p1", true, Some(7.5))).unwrap();

        let events = read_progress_events(log.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::RunStart { .. }));
    }

    #[test]
    fn partial_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path(), "run-1").unwrap();
        log.append(&run_start(4)).unwrap();
        // Simulate a crash mid-write.
        {
            let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
            f.write_all(b"{\"event_type\":\"test_complete\",\"scena").unwrap();
        }
        let events = read_progress_events(log.path()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn missing_journal_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = read_progress_events(&dir.path().join("ghost.jsonl")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn grid_keeps_first_run_start_plan() {
        let events = vec![
            run_start(20),
            complete("s1", "p1", true, Some(6.0)),
            // A resume writes a smaller run_start; it must not win.
            run_start(13),
            complete("s1", "p2", true, Some(7.0)),
        ];
        let grid = ProgressGrid::from_events(&events);
        assert_eq!(grid.total_tests, 20);
        assert_eq!(grid.completed_events, 2);
    }

    #[test]
    fn grid_cell_is_latest_outcome() {
        let events = vec![
            run_start(4),
            complete("s1", "p1", false, None),
            ProgressEvent::TestError {
                ts: Utc::now(),
                scenario_id: "s2".into(),
                profile_name: "p1".into(),
                attempt: 1,
                error_message: "backend exploded".into(),
            },
            // Retried on resume and now passing.
            complete("s1", "p1", true, Some(8.0)),
        ];
        let grid = ProgressGrid::from_events(&events);
        assert_eq!(grid.outcome("s1", "p1"), Some(CellOutcome::Pass(Some(8.0))));
        assert_eq!(grid.outcome("s2", "p1"), Some(CellOutcome::Error));
        assert_eq!(grid.outcome("s2", "p2"), None);
        assert_eq!(grid.completed_events, 2);
        assert_eq!(grid.error_events, 1);
    }

    #[test]
    fn grid_records_run_completion() {
        let events = vec![
            run_start(1),
            complete("s1", "p1", true, Some(9.0)),
            ProgressEvent::RunComplete {
                ts: Utc::now(),
                duration_ms: 5_000,
            },
        ];
        let grid = ProgressGrid::from_events(&events);
        assert!(grid.run_complete);
        assert_eq!(grid.duration_ms, Some(5_000));
    }

    #[test]
    fn concurrent_reader_sees_flushed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path(), "run-1").unwrap();
        log.append(&run_start(2)).unwrap();
        // Reader opens while the writer still holds the file.
        let grid = ProgressGrid::from_file(log.path()).unwrap();
        assert_eq!(grid.total_tests, 2);
        log.append(&complete("s1", "p1", true, None)).unwrap();
        let grid = ProgressGrid::from_file(log.path()).unwrap();
        assert_eq!(grid.completed_events, 1);
    }
}
