//! SQLite evaluation store.
//!
//! Durable home of runs, results, and interaction evaluations. Every write
//! is a short transaction; readers see committed snapshots. Result rows are
//! append-with-history by default — rejudging the same natural key inserts a
//! new row unless the caller explicitly asks to overwrite.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use tb_domain::record::{CellCoord, Run, RunStatus, TrialResult};
use tb_domain::trace::TraceEvent;
use tb_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BUSY_TIMEOUT_MS: u64 = 5_000;

const RESULT_COLUMNS: &str = "id, run_id, scenario_id, scenario_name, profile_name, attempt, \
     provider, ego_model, superego_model, dialogue_id, latency_ms, api_calls, \
     input_tokens, output_tokens, success, error_message, skip_rubric, \
     dimension_scores, overall_score, base_score, recognition_score, judge_model, \
     cell_recognition, cell_tutor_multi, cell_learner_psycho, \
     qualitative_assessment, blinded_assessment, created_at";

/// Which derived score column a factorial query extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreColumn {
    Overall,
    Base,
    Recognition,
}

impl ScoreColumn {
    fn column(self) -> &'static str {
        match self {
            Self::Overall => "overall_score",
            Self::Base => "base_score",
            Self::Recognition => "recognition_score",
        }
    }
}

/// A run plus its progress aggregates, as returned by [`EvalStore::list_runs`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run: Run,
    /// Result rows stored for the run (history included).
    pub results_total: u32,
    /// Distinct natural keys with at least one successful result.
    pub completed_trials: u32,
}

/// A stored interaction evaluation (second-pass judge assessment).
#[derive(Debug, Clone)]
pub struct InteractionEval {
    pub id: i64,
    pub result_id: i64,
    pub dialogue_id: String,
    pub judge_model: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The SQLite-backed evaluation store. One instance per process; the
/// connection is serialised behind a mutex and every operation is a short
/// transaction.
pub struct EvalStore {
    conn: Mutex<Connection>,
}

impl EvalStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "wal")
            .map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "normal")
            .map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        tracing::info!(path = %path.display(), "evaluation store ready");
        Ok(store)
    }

    /// An in-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id               TEXT PRIMARY KEY,
                description          TEXT NOT NULL,
                total_scenarios      INTEGER NOT NULL,
                total_configurations INTEGER NOT NULL,
                status               TEXT NOT NULL,
                created_at           TEXT NOT NULL,
                completed_at         TEXT,
                metadata             TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS results (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id              TEXT NOT NULL,
                scenario_id         TEXT NOT NULL,
                scenario_name       TEXT NOT NULL,
                profile_name        TEXT NOT NULL,
                attempt             INTEGER NOT NULL,
                provider            TEXT NOT NULL,
                ego_model           TEXT NOT NULL,
                superego_model      TEXT,
                dialogue_id         TEXT,
                latency_ms          INTEGER NOT NULL,
                api_calls           INTEGER NOT NULL,
                input_tokens        INTEGER NOT NULL,
                output_tokens       INTEGER NOT NULL,
                success             INTEGER NOT NULL,
                error_message       TEXT,
                skip_rubric         INTEGER NOT NULL DEFAULT 0,
                dimension_scores    TEXT NOT NULL DEFAULT '{}',
                overall_score       REAL,
                base_score          REAL,
                recognition_score   REAL,
                judge_model         TEXT,
                cell_recognition    INTEGER,
                cell_tutor_multi    INTEGER,
                cell_learner_psycho INTEGER,
                created_at          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
            CREATE INDEX IF NOT EXISTS idx_results_key
                ON results(run_id, scenario_id, profile_name, attempt);
            CREATE TABLE IF NOT EXISTS interaction_evals (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                result_id   INTEGER NOT NULL,
                dialogue_id TEXT NOT NULL,
                judge_model TEXT NOT NULL,
                payload     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;

        // Qualitative columns arrived after the original schema; add them
        // in place when an older database lacks them.
        for column in ["qualitative_assessment", "blinded_assessment"] {
            if !column_exists(&conn, "results", column)? {
                conn.execute_batch(&format!("ALTER TABLE results ADD COLUMN {column} TEXT"))
                    .map_err(db_err)?;
                tracing::info!(column, "added lazy qualitative column");
            }
        }
        Ok(())
    }

    // ── Runs ───────────────────────────────────────────────────────

    /// Create a new run with a fresh date-stamped id.
    pub fn create_run(
        &self,
        description: &str,
        total_scenarios: u32,
        total_configurations: u32,
        metadata: serde_json::Value,
    ) -> Result<Run> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let base_id = Run::generate_id(now);

        // Same-second collisions get a numeric suffix.
        let mut run_id = base_id.clone();
        let mut suffix = 1;
        while run_exists(&conn, &run_id)? {
            suffix += 1;
            run_id = format!("{base_id}-{suffix}");
        }

        let run = Run {
            run_id,
            description: description.to_owned(),
            total_scenarios,
            total_configurations,
            status: RunStatus::Running,
            created_at: now,
            completed_at: None,
            metadata,
        };
        conn.execute(
            "INSERT INTO runs (run_id, description, total_scenarios, total_configurations,
                               status, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id,
                run.description,
                run.total_scenarios,
                run.total_configurations,
                run.status.as_str(),
                run.created_at.to_rfc3339(),
                run.metadata.to_string(),
            ],
        )
        .map_err(db_err)?;
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT run_id, description, total_scenarios, total_configurations,
                    status, created_at, completed_at, metadata
             FROM runs WHERE run_id = ?1",
            params![run_id],
            row_to_run,
        )
        .optional()
        .map_err(db_err)
    }

    /// Transition a run to `completed`. Idempotent: completing a completed
    /// run is a no-op; a failed run stays failed.
    pub fn complete_run(&self, run_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE runs SET status = 'completed', completed_at = ?2
                 WHERE run_id = ?1 AND status = 'running'",
                params![run_id, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        if changed == 0 && !run_exists(&conn, run_id)? {
            return Err(Error::Store(format!("unknown run '{run_id}'")));
        }
        Ok(())
    }

    /// Partial update of a run. This is the only path that may revert
    /// `completed → running` (used by resume `--force` and `revert`).
    pub fn update_run(
        &self,
        run_id: &str,
        status: Option<RunStatus>,
        description: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        if !run_exists(&conn, run_id)? {
            return Err(Error::Store(format!("unknown run '{run_id}'")));
        }
        if let Some(status) = status {
            match status {
                RunStatus::Running => {
                    conn.execute(
                        "UPDATE runs SET status = 'running', completed_at = NULL WHERE run_id = ?1",
                        params![run_id],
                    )
                    .map_err(db_err)?;
                }
                other => {
                    conn.execute(
                        "UPDATE runs SET status = ?2, completed_at = COALESCE(completed_at, ?3)
                         WHERE run_id = ?1",
                        params![run_id, other.as_str(), Utc::now().to_rfc3339()],
                    )
                    .map_err(db_err)?;
                }
            }
        }
        if let Some(description) = description {
            conn.execute(
                "UPDATE runs SET description = ?2 WHERE run_id = ?1",
                params![run_id, description],
            )
            .map_err(db_err)?;
        }
        if let Some(metadata) = metadata {
            conn.execute(
                "UPDATE runs SET metadata = ?2 WHERE run_id = ?1",
                params![run_id, metadata.to_string()],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// List runs, newest first, with progress aggregates.
    pub fn list_runs(&self, status: Option<RunStatus>, limit: Option<u32>) -> Result<Vec<RunSummary>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT run_id, description, total_scenarios, total_configurations,
                    status, created_at, completed_at, metadata,
                    (SELECT COUNT(*) FROM results WHERE results.run_id = runs.run_id),
                    (SELECT COUNT(DISTINCT scenario_id || '|' || profile_name || '|' || attempt)
                       FROM results WHERE results.run_id = runs.run_id AND success = 1)
             FROM runs {} ORDER BY created_at DESC LIMIT ?2",
            if status.is_some() {
                "WHERE status = ?1"
            } else {
                "WHERE ?1 IS NULL"
            }
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    status.map(RunStatus::as_str),
                    limit.map(i64::from).unwrap_or(i64::MAX)
                ],
                |row| {
                    Ok(RunSummary {
                        run: row_to_run(row)?,
                        results_total: row.get(8)?,
                        completed_trials: row.get(9)?,
                    })
                },
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ── Results ────────────────────────────────────────────────────

    /// Persist a trial result.
    ///
    /// Default policy appends: a second store for the same natural key adds
    /// a history row. With `overwrite` the latest row for the key is updated
    /// in place instead.
    pub fn store_result(&self, result: &TrialResult, overwrite: bool) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let existing: Option<i64> = if overwrite {
            tx.query_row(
                "SELECT MAX(id) FROM results
                 WHERE run_id = ?1 AND scenario_id = ?2 AND profile_name = ?3 AND attempt = ?4",
                params![
                    result.run_id,
                    result.scenario_id,
                    result.profile_name,
                    result.attempt
                ],
                |row| row.get(0),
            )
            .map_err(db_err)?
        } else {
            None
        };

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE results SET
                        scenario_name = ?2, provider = ?3, ego_model = ?4, superego_model = ?5,
                        dialogue_id = ?6, latency_ms = ?7, api_calls = ?8, input_tokens = ?9,
                        output_tokens = ?10, success = ?11, error_message = ?12, skip_rubric = ?13,
                        dimension_scores = ?14, overall_score = ?15, base_score = ?16,
                        recognition_score = ?17, judge_model = ?18, cell_recognition = ?19,
                        cell_tutor_multi = ?20, cell_learner_psycho = ?21, created_at = ?22
                     WHERE id = ?1",
                    params![
                        id,
                        result.scenario_name,
                        result.provider,
                        result.ego_model,
                        result.superego_model,
                        result.dialogue_id,
                        result.latency_ms as i64,
                        result.api_calls,
                        result.input_tokens as i64,
                        result.output_tokens as i64,
                        result.success,
                        result.error_message,
                        result.skip_rubric,
                        serde_json::to_string(&result.dimension_scores)?,
                        result.overall_score,
                        result.base_score,
                        result.recognition_score,
                        result.judge_model,
                        result.cell.map(|c| c.recognition),
                        result.cell.map(|c| c.tutor_multi),
                        result.cell.map(|c| c.learner_psycho),
                        result.created_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO results (
                        run_id, scenario_id, scenario_name, profile_name, attempt,
                        provider, ego_model, superego_model, dialogue_id, latency_ms,
                        api_calls, input_tokens, output_tokens, success, error_message,
                        skip_rubric, dimension_scores, overall_score, base_score,
                        recognition_score, judge_model, cell_recognition, cell_tutor_multi,
                        cell_learner_psycho, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                             ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
                    params![
                        result.run_id,
                        result.scenario_id,
                        result.scenario_name,
                        result.profile_name,
                        result.attempt,
                        result.provider,
                        result.ego_model,
                        result.superego_model,
                        result.dialogue_id,
                        result.latency_ms as i64,
                        result.api_calls,
                        result.input_tokens as i64,
                        result.output_tokens as i64,
                        result.success,
                        result.error_message,
                        result.skip_rubric,
                        serde_json::to_string(&result.dimension_scores)?,
                        result.overall_score,
                        result.base_score,
                        result.recognition_score,
                        result.judge_model,
                        result.cell.map(|c| c.recognition),
                        result.cell.map(|c| c.tutor_multi),
                        result.cell.map(|c| c.learner_psycho),
                        result.created_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
                tx.last_insert_rowid()
            }
        };

        tx.commit().map_err(db_err)?;
        Ok(id)
    }

    /// Attach judge output to an existing result row.
    pub fn update_result_scores(
        &self,
        result_id: i64,
        dimension_scores: &BTreeMap<String, tb_domain::record::DimensionScore>,
        overall_score: f64,
        base_score: f64,
        recognition_score: f64,
        judge_model: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE results SET dimension_scores = ?2, overall_score = ?3,
                        base_score = ?4, recognition_score = ?5, judge_model = ?6
                 WHERE id = ?1",
                params![
                    result_id,
                    serde_json::to_string(dimension_scores)?,
                    overall_score,
                    base_score,
                    recognition_score,
                    judge_model,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::Store(format!("unknown result id {result_id}")));
        }
        Ok(())
    }

    /// Attach qualitative assessments (post-hoc coders).
    pub fn attach_qualitative(
        &self,
        result_id: i64,
        qualitative: Option<&str>,
        blinded: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE results SET
                    qualitative_assessment = COALESCE(?2, qualitative_assessment),
                    blinded_assessment = COALESCE(?3, blinded_assessment)
                 WHERE id = ?1",
                params![result_id, qualitative, blinded],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::Store(format!("unknown result id {result_id}")));
        }
        Ok(())
    }

    /// Fetch results for a run in insertion order, with optional filters.
    pub fn get_results(
        &self,
        run_id: &str,
        scenario_id: Option<&str>,
        profile_name: Option<&str>,
    ) -> Result<Vec<TrialResult>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM results
             WHERE run_id = ?1
               AND (?2 IS NULL OR scenario_id = ?2)
               AND (?3 IS NULL OR profile_name = ?3)
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id, scenario_id, profile_name], row_to_result)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn get_result(&self, result_id: i64) -> Result<Option<TrialResult>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {RESULT_COLUMNS} FROM results WHERE id = ?1"),
            params![result_id],
            row_to_result,
        )
        .optional()
        .map_err(db_err)
    }

    /// Successful results still waiting for a judge pass (null overall
    /// score). These are what `evaluate` and `--follow` work through.
    pub fn results_needing_judgement(&self, run_id: &str) -> Result<Vec<TrialResult>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM results
             WHERE run_id = ?1 AND success = 1 AND overall_score IS NULL
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map(params![run_id], row_to_result).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Scores per factorial cell, suitable for ANOVA grouping.
    ///
    /// Only the latest row per natural key counts, so rejudge history never
    /// double-counts a trial.
    pub fn get_factorial_cell_data(
        &self,
        run_id: &str,
        column: ScoreColumn,
    ) -> Result<BTreeMap<String, Vec<f64>>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT cell_recognition, cell_tutor_multi, cell_learner_psycho, {col}
             FROM results
             WHERE run_id = ?1 AND success = 1 AND {col} IS NOT NULL
               AND cell_recognition IS NOT NULL
               AND id IN (SELECT MAX(id) FROM results WHERE run_id = ?1
                          GROUP BY scenario_id, profile_name, attempt)
             ORDER BY id",
            col = column.column()
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let cell = CellCoord {
                    recognition: row.get(0)?,
                    tutor_multi: row.get(1)?,
                    learner_psycho: row.get(2)?,
                };
                let score: f64 = row.get(3)?;
                Ok((cell.key(), score))
            })
            .map_err(db_err)?;

        let mut data: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in rows {
            let (key, score) = row.map_err(db_err)?;
            data.entry(key).or_default().push(score);
        }
        Ok(data)
    }

    // ── Interaction evaluations ────────────────────────────────────

    pub fn store_interaction_eval(
        &self,
        result_id: i64,
        dialogue_id: &str,
        judge_model: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO interaction_evals (result_id, dialogue_id, judge_model, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result_id,
                dialogue_id,
                judge_model,
                payload.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_interaction_evals(&self, result_id: i64) -> Result<Vec<InteractionEval>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, result_id, dialogue_id, judge_model, payload, created_at
                 FROM interaction_evals WHERE result_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![result_id], |row| {
                Ok(InteractionEval {
                    id: row.get(0)?,
                    result_id: row.get(1)?,
                    dialogue_id: row.get(2)?,
                    judge_model: row.get(3)?,
                    payload: parse_json_column(row, 4)?,
                    created_at: parse_ts_column(row, 5)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ── Staleness ──────────────────────────────────────────────────

    /// Close runs whose generator process is demonstrably dead and whose
    /// last activity is older than `threshold_minutes`. Returns the run ids
    /// that were (or with `dry_run`, would be) closed.
    pub fn auto_complete_stale_runs(&self, threshold_minutes: i64, dry_run: bool) -> Result<Vec<String>> {
        let candidates = self.list_runs(Some(RunStatus::Running), None)?;
        let now = Utc::now();
        let mut closed = Vec::new();

        for summary in candidates {
            let run = summary.run;
            let pid = run.metadata.get("pid").and_then(|v| v.as_u64());
            // Without a recorded pid there is nothing to demonstrate.
            let Some(pid) = pid else { continue };
            if pid_alive(pid as u32) {
                continue;
            }

            let last_activity = self.last_activity(&run.run_id)?.unwrap_or(run.created_at);
            let idle_minutes = (now - last_activity).num_minutes();
            if idle_minutes < threshold_minutes {
                continue;
            }

            if !dry_run {
                let mut metadata = run.metadata.clone();
                if let Some(obj) = metadata.as_object_mut() {
                    obj.insert("stale_closed".into(), serde_json::json!(true));
                    obj.insert("stale_idle_minutes".into(), serde_json::json!(idle_minutes));
                }
                self.update_run(&run.run_id, Some(RunStatus::Completed), None, Some(metadata))?;
                TraceEvent::StaleRunClosed {
                    run_id: run.run_id.clone(),
                    idle_minutes,
                }
                .emit();
            }
            closed.push(run.run_id);
        }
        Ok(closed)
    }

    fn last_activity(&self, run_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT MAX(created_at) FROM results WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn db_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn run_exists(conn: &Connection, run_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM runs WHERE run_id = ?1",
        params![run_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(db_err)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(db_err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(db_err)?;
    for name in names {
        if name.map_err(db_err)? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Probe whether a process is still alive (signal 0).
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    // EPERM means alive but not ours; ESRCH means gone.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No cheap probe — never declare a run dead on these platforms.
    true
}

fn parse_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status_raw: String = row.get(4)?;
    let completed_at: Option<String> = row.get(6)?;
    Ok(Run {
        run_id: row.get(0)?,
        description: row.get(1)?,
        total_scenarios: row.get(2)?,
        total_configurations: row.get(3)?,
        status: RunStatus::parse(&status_raw).unwrap_or(RunStatus::Failed),
        created_at: parse_ts_column(row, 5)?,
        completed_at: completed_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        metadata: parse_json_column(row, 7)?,
    })
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrialResult> {
    let cell_recognition: Option<bool> = row.get(22)?;
    let cell = match cell_recognition {
        Some(recognition) => Some(CellCoord {
            recognition,
            tutor_multi: row.get::<_, Option<bool>>(23)?.unwrap_or(false),
            learner_psycho: row.get::<_, Option<bool>>(24)?.unwrap_or(false),
        }),
        None => None,
    };
    let dimension_scores_raw: String = row.get(17)?;
    Ok(TrialResult {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        scenario_id: row.get(2)?,
        scenario_name: row.get(3)?,
        profile_name: row.get(4)?,
        attempt: row.get(5)?,
        provider: row.get(6)?,
        ego_model: row.get(7)?,
        superego_model: row.get(8)?,
        dialogue_id: row.get(9)?,
        latency_ms: row.get::<_, i64>(10)? as u64,
        api_calls: row.get(11)?,
        input_tokens: row.get::<_, i64>(12)? as u64,
        output_tokens: row.get::<_, i64>(13)? as u64,
        success: row.get(14)?,
        error_message: row.get(15)?,
        skip_rubric: row.get(16)?,
        dimension_scores: serde_json::from_str(&dimension_scores_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(17, Type::Text, Box::new(e))
        })?,
        overall_score: row.get(18)?,
        base_score: row.get(19)?,
        recognition_score: row.get(20)?,
        judge_model: row.get(21)?,
        cell,
        qualitative_assessment: row.get(25)?,
        blinded_assessment: row.get(26)?,
        created_at: parse_ts_column(row, 27)?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
