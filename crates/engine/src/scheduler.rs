//! The scheduler — plan execution, judging, resume, and rejudge.
//!
//! Trials run on a bounded worker pool (semaphore + join set, plain FIFO).
//! Each worker runs its dialogue strictly sequentially, judges the result,
//! commits to the store, and only then appends to the progress journal — an
//! observer of the journal can trust that a `test_complete` event implies
//! the row is already visible in the database.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use tb_backend::{BackendRegistry, RoleBinding};
use tb_domain::config::{
    ModelsConfig, ProfileCatalogue, RunDefaults, Scenario, ScenarioCatalogue, TutorArchitecture,
    TutorProfile,
};
use tb_domain::error::{Error, Result};
use tb_domain::progress::ProgressEvent;
use tb_domain::record::{Run, RunStatus, TrialResult};
use tb_domain::trace::TraceEvent;
use tb_store::{EvalStore, ProgressLog, TranscriptStore};

use crate::cancel::CancelToken;
use crate::dialogue::{DialogueBackends, DialogueEngine};
use crate::judge::Judge;
use crate::plan::{expand_plan, RunSpec, Trial};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What happened to one dispatched trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrialFate {
    Succeeded,
    Failed,
    Errored,
    Skipped,
}

/// Summary of a run (or resume) invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub planned: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: usize,
    pub cancelled: bool,
}

impl RunReport {
    /// CLI exit code: 0 clean, 2 partial failure.
    pub fn exit_code(&self) -> i32 {
        if self.failed + self.errors > 0 {
            2
        } else {
            0
        }
    }
}

/// Summary of a rejudge invocation.
#[derive(Debug, Clone)]
pub struct RejudgeReport {
    pub rejudged: usize,
    pub skipped: usize,
    pub overwrite: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Scheduler {
    store: Arc<EvalStore>,
    transcripts: Arc<TranscriptStore>,
    progress_dir: PathBuf,
    registry: Arc<BackendRegistry>,
    models: ModelsConfig,
    defaults: RunDefaults,
}

impl Scheduler {
    pub fn new(
        store: Arc<EvalStore>,
        transcripts: Arc<TranscriptStore>,
        progress_dir: PathBuf,
        registry: Arc<BackendRegistry>,
        models: ModelsConfig,
        defaults: RunDefaults,
    ) -> Self {
        Self {
            store,
            transcripts,
            progress_dir,
            registry,
            models,
            defaults,
        }
    }

    // ── Fresh runs ─────────────────────────────────────────────────

    /// Expand the specification, create the run, and execute every trial.
    pub async fn run(
        &self,
        spec: RunSpec,
        scenarios: &ScenarioCatalogue,
        profiles: &ProfileCatalogue,
        parallelism: usize,
        cancel: CancelToken,
    ) -> Result<RunReport> {
        let plan = expand_plan(&spec, scenarios, profiles)?;
        let metadata = serde_json::json!({
            "pid": std::process::id(),
            "spec": &spec,
            "scenario_ids": plan.scenario_ids(),
            "profile_names": plan.profile_names(),
            "scenarios_env": std::env::var("TUTORBENCH_SCENARIOS").ok(),
        });
        let run = self.store.create_run(
            &spec.description,
            plan.scenarios.len() as u32,
            plan.profiles.len() as u32,
            metadata,
        )?;
        tracing::info!(
            run_id = %run.run_id,
            scenarios = plan.scenarios.len(),
            profiles = plan.profiles.len(),
            trials = plan.trials.len(),
            "run created"
        );

        let progress = Arc::new(ProgressLog::open(&self.progress_dir, &run.run_id)?);
        progress.append(&ProgressEvent::RunStart {
            ts: Utc::now(),
            run_id: run.run_id.clone(),
            scenarios: plan.scenario_ids(),
            profiles: plan.profile_names(),
            total_tests: run.total_tests(),
        })?;

        self.execute(&run, &spec, plan.trials, parallelism, progress, cancel)
            .await
    }

    /// Resume an interrupted run: re-expand the original plan from run
    /// metadata and dispatch only the trials without a successful result.
    pub async fn resume(
        &self,
        run_id: &str,
        scenarios: &ScenarioCatalogue,
        profiles: &ProfileCatalogue,
        parallelism: Option<usize>,
        force: bool,
        cancel: CancelToken,
    ) -> Result<RunReport> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| Error::Config(format!("unknown run '{run_id}'")))?;
        if run.status == RunStatus::Completed && !force {
            return Err(Error::Config(format!(
                "run '{run_id}' is already completed; pass --force to resume anyway"
            )));
        }
        let spec: RunSpec = serde_json::from_value(
            run.metadata
                .get("spec")
                .cloned()
                .ok_or_else(|| Error::Config(format!("run '{run_id}' has no stored spec")))?,
        )?;

        let plan = expand_plan(&spec, scenarios, profiles)?;
        let done: std::collections::HashSet<(String, String, u32)> = self
            .store
            .get_results(run_id, None, None)?
            .into_iter()
            .filter(|r| r.success)
            .map(|r| (r.scenario_id, r.profile_name, r.attempt))
            .collect();
        let remaining: Vec<Trial> = plan
            .trials
            .into_iter()
            .filter(|t| !done.contains(&t.natural_key()))
            .collect();

        TraceEvent::RunResumed {
            run_id: run_id.to_owned(),
            remaining: remaining.len(),
        }
        .emit();

        // The no-op status write for an already-running run, the explicit
        // reversion for a force-resumed completed one.
        self.store
            .update_run(run_id, Some(RunStatus::Running), None, None)?;

        // A resume emits its own run_start for liveness; grid builders only
        // honour the first one, so the original plan size is preserved.
        let progress = Arc::new(ProgressLog::open(&self.progress_dir, run_id)?);
        progress.append(&ProgressEvent::RunStart {
            ts: Utc::now(),
            run_id: run_id.to_owned(),
            scenarios: plan.scenarios.iter().map(|s| s.id.clone()).collect(),
            profiles: plan.profiles.iter().map(|p| p.name.clone()).collect(),
            total_tests: run.total_tests(),
        })?;

        let parallelism = parallelism.unwrap_or(self.defaults.parallelism);
        self.execute(&run, &spec, remaining, parallelism, progress, cancel)
            .await
    }

    // ── Dispatch ───────────────────────────────────────────────────

    async fn execute(
        &self,
        run: &Run,
        spec: &RunSpec,
        trials: Vec<Trial>,
        parallelism: usize,
        progress: Arc<ProgressLog>,
        cancel: CancelToken,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let judge = Arc::new(self.judge(spec.judge_model.as_deref())?);
        let planned = trials.len();

        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
        let mut join_set: JoinSet<TrialFate> = JoinSet::new();

        for trial in trials {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Trial(format!("worker pool closed: {e}")))?;
            let backends = self.dialogue_backends(&trial.profile)?;
            let worker = TrialWorker {
                store: self.store.clone(),
                transcripts: self.transcripts.clone(),
                progress: progress.clone(),
                judge: judge.clone(),
                run_id: run.run_id.clone(),
                skip_rubric: spec.skip_rubric,
                max_turns: self.defaults.max_turns,
                cancel: cancel.clone(),
            };
            join_set.spawn(async move {
                let _permit = permit;
                worker.execute(trial, backends).await
            });
        }

        let mut report = RunReport {
            run_id: run.run_id.clone(),
            planned,
            executed: 0,
            succeeded: 0,
            failed: 0,
            errors: 0,
            cancelled: false,
        };
        while let Some(joined) = join_set.join_next().await {
            let fate = joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "trial task panicked");
                TrialFate::Errored
            });
            match fate {
                TrialFate::Succeeded => {
                    report.executed += 1;
                    report.succeeded += 1;
                }
                TrialFate::Failed => {
                    report.executed += 1;
                    report.failed += 1;
                }
                TrialFate::Errored => {
                    report.executed += 1;
                    report.errors += 1;
                }
                TrialFate::Skipped => {}
            }
        }

        report.cancelled = cancel.is_cancelled();
        if report.cancelled {
            // Leave the run open; the skipped remainder belongs to the next
            // resume.
            tracing::warn!(run_id = %run.run_id, skipped = planned - report.executed, "run cancelled");
        } else {
            self.store.complete_run(&run.run_id)?;
            progress.append(&ProgressEvent::RunComplete {
                ts: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
            })?;
        }
        Ok(report)
    }

    // ── Rejudge ────────────────────────────────────────────────────

    /// Re-apply the judge to the latest successful result of every natural
    /// key (optionally filtered by scenario).
    ///
    /// Default policy inserts new rows so judge history is preserved for
    /// inter-judge reliability analysis; `overwrite` updates in place.
    pub async fn rejudge(
        &self,
        run_id: &str,
        scenarios: &ScenarioCatalogue,
        judge_model: Option<&str>,
        scenario_filter: Option<&str>,
        overwrite: bool,
    ) -> Result<RejudgeReport> {
        self.store
            .get_run(run_id)?
            .ok_or_else(|| Error::Config(format!("unknown run '{run_id}'")))?;
        let judge = Arc::new(self.judge(judge_model)?);

        // Latest successful row per natural key.
        let mut latest: HashMap<(String, String, u32), TrialResult> = HashMap::new();
        for result in self.store.get_results(run_id, scenario_filter, None)? {
            if !result.success {
                continue;
            }
            let key = (
                result.scenario_id.clone(),
                result.profile_name.clone(),
                result.attempt,
            );
            match latest.get(&key) {
                Some(existing) if existing.id >= result.id => {}
                _ => {
                    latest.insert(key, result);
                }
            }
        }
        let mut targets: Vec<TrialResult> = latest.into_values().collect();
        targets.sort_by_key(|r| r.id);

        let mut report = RejudgeReport {
            rejudged: 0,
            skipped: 0,
            overwrite,
        };
        let semaphore = Arc::new(Semaphore::new(self.defaults.parallelism.max(1)));
        let futures: Vec<_> = targets
            .into_iter()
            .map(|result| {
                let judge = judge.clone();
                let semaphore = semaphore.clone();
                let transcripts = self.transcripts.clone();
                let scenario = scenarios.get(&result.scenario_id).cloned();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let Some(scenario) = scenario else {
                        tracing::warn!(
                            scenario_id = %result.scenario_id,
                            "scenario missing from catalogue; skipping rejudge"
                        );
                        return (result, None);
                    };
                    let verdict = rejudge_one(&judge, &transcripts, &scenario, &result).await;
                    (result, verdict)
                }
            })
            .collect();

        for (result, verdict) in futures_util::future::join_all(futures).await {
            let Some(verdict) = verdict else {
                report.skipped += 1;
                continue;
            };
            let Some(result_id) = result.id else {
                report.skipped += 1;
                continue;
            };
            if overwrite {
                self.store.update_result_scores(
                    result_id,
                    &verdict.dimension_scores,
                    verdict.overall_score,
                    verdict.base_score,
                    verdict.recognition_score,
                    &verdict.judge_model,
                )?;
            } else {
                let mut row = result;
                row.id = None;
                row.dimension_scores = verdict.dimension_scores;
                row.overall_score = Some(verdict.overall_score);
                row.base_score = Some(verdict.base_score);
                row.recognition_score = Some(verdict.recognition_score);
                row.judge_model = Some(verdict.judge_model);
                row.created_at = Utc::now();
                self.store.store_result(&row, false)?;
            }
            report.rejudged += 1;
        }
        Ok(report)
    }

    // ── Evaluate (skip-rubric / judge-failure backlog) ─────────────

    /// Judge every successful result with null scores, updating rows in
    /// place. With `review`, the full verdict is additionally stored as an
    /// interaction evaluation for audit.
    pub async fn evaluate_pending(
        &self,
        run_id: &str,
        scenarios: &ScenarioCatalogue,
        judge_model: Option<&str>,
        review: bool,
    ) -> Result<usize> {
        let judge = self.judge(judge_model)?;
        let pending = self.store.results_needing_judgement(run_id)?;
        let mut judged = 0;
        for result in pending {
            let Some(result_id) = result.id else { continue };
            let Some(scenario) = scenarios.get(&result.scenario_id).cloned() else {
                tracing::warn!(
                    scenario_id = %result.scenario_id,
                    "scenario missing from catalogue; cannot evaluate"
                );
                continue;
            };
            match rejudge_one(&judge, &self.transcripts, &scenario, &result).await {
                Some(verdict) => {
                    self.store.update_result_scores(
                        result_id,
                        &verdict.dimension_scores,
                        verdict.overall_score,
                        verdict.base_score,
                        verdict.recognition_score,
                        &verdict.judge_model,
                    )?;
                    if review {
                        if let Some(dialogue_id) = &result.dialogue_id {
                            let payload = serde_json::json!({
                                "dimensions": verdict.dimension_scores,
                                "required_elements": verdict.required_elements,
                                "forbidden_elements": verdict.forbidden_elements,
                                "summary": verdict.summary,
                            });
                            self.store.store_interaction_eval(
                                result_id,
                                dialogue_id,
                                &verdict.judge_model,
                                &payload,
                            )?;
                        }
                    }
                    judged += 1;
                }
                None => {
                    TraceEvent::JudgeFallback {
                        run_id: run_id.to_owned(),
                        scenario_id: result.scenario_id.clone(),
                        profile_name: result.profile_name.clone(),
                        reason: "evaluate pass failed; will retry on next poll".into(),
                    }
                    .emit();
                }
            }
        }
        Ok(judged)
    }

    // ── Role resolution ────────────────────────────────────────────

    fn role(&self, name: &str) -> Result<RoleBinding> {
        let role = self
            .models
            .role(name)
            .ok_or_else(|| Error::Config(format!("role '{name}' is not configured")))?;
        self.registry.bind(name, role)
    }

    fn judge(&self, model_override: Option<&str>) -> Result<Judge> {
        let mut binding = self.role("judge")?;
        if let Some(model) = model_override {
            binding = binding.with_model(model);
        }
        Ok(Judge::new(binding))
    }

    /// Resolve the three dialogue roles for a profile, applying per-profile
    /// model and temperature overrides.
    fn dialogue_backends(&self, profile: &TutorProfile) -> Result<DialogueBackends> {
        let apply = |mut binding: RoleBinding, model: &Option<String>| -> RoleBinding {
            if let Some(model) = model {
                binding = binding.with_model(model);
            }
            if let Some(temperature) = profile.temperature {
                binding.config.temperature = temperature;
            }
            binding
        };

        let ego = apply(self.role("tutor_ego")?, &profile.ego_model);
        let superego = if profile.tutor_architecture == TutorArchitecture::EgoSuperego {
            // Fall back to the ego role when no dedicated superego role is
            // configured.
            let base = match self.models.role("tutor_superego") {
                Some(role) => self.registry.bind("tutor_superego", role)?,
                None => self.role("tutor_ego")?,
            };
            Some(apply(base, &profile.superego_model))
        } else {
            None
        };
        let learner = apply(self.role("learner")?, &None);

        Ok(DialogueBackends {
            ego,
            superego,
            learner,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trial worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one worker needs, cloned out of the scheduler so the task is
/// `'static`.
struct TrialWorker {
    store: Arc<EvalStore>,
    transcripts: Arc<TranscriptStore>,
    progress: Arc<ProgressLog>,
    judge: Arc<Judge>,
    run_id: String,
    skip_rubric: bool,
    max_turns: u32,
    cancel: CancelToken,
}

impl TrialWorker {
    async fn execute(self, trial: Trial, backends: DialogueBackends) -> TrialFate {
        // Not-yet-started work is dropped on cancellation; the next resume
        // picks it up.
        if self.cancel.is_cancelled() {
            return TrialFate::Skipped;
        }

        let scenario = trial.scenario;
        let profile = trial.profile;
        let attempt = trial.attempt;
        TraceEvent::TrialStarted {
            run_id: self.run_id.clone(),
            scenario_id: scenario.id.clone(),
            profile_name: profile.name.clone(),
            attempt,
        }
        .emit();
        if let Err(e) = self.progress.append(&ProgressEvent::TestStart {
            ts: Utc::now(),
            scenario_id: scenario.id.clone(),
            profile_name: profile.name.clone(),
            attempt,
        }) {
            tracing::warn!(error = %e, "progress append failed");
        }

        let provider = backends.ego.config.provider.clone();
        let ego_model = backends.ego.model().to_owned();
        let superego_model = backends.superego.as_ref().map(|b| b.model().to_owned());

        let engine = DialogueEngine::new(
            scenario.clone(),
            profile.clone(),
            backends,
            self.max_turns,
            self.cancel.clone(),
        );
        let outcome = engine.run().await;

        let dialogue_id = outcome.transcript.dialogue_id.clone();
        // The transcript always lands on disk, even for partial failures.
        if let Err(e) = self.transcripts.write(&outcome.transcript) {
            tracing::error!(error = %e, dialogue_id = %dialogue_id, "transcript write failed");
            self.append_error(&scenario.id, &profile.name, attempt, &e.to_string());
            return TrialFate::Errored;
        }

        let mut result = TrialResult {
            id: None,
            run_id: self.run_id.clone(),
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            profile_name: profile.name.clone(),
            attempt,
            provider,
            ego_model,
            superego_model,
            dialogue_id: Some(dialogue_id),
            latency_ms: outcome.latency_ms,
            api_calls: outcome.api_calls,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            success: outcome.success,
            error_message: outcome.error_message.clone(),
            skip_rubric: self.skip_rubric,
            dimension_scores: Default::default(),
            overall_score: None,
            base_score: None,
            recognition_score: None,
            judge_model: None,
            cell: Some(profile.cell()),
            qualitative_assessment: None,
            blinded_assessment: None,
            created_at: Utc::now(),
        };

        if outcome.success && !self.skip_rubric {
            match self
                .judge
                .score(&scenario, &outcome.transcript, &outcome.suggestions)
                .await
            {
                Ok(verdict) => {
                    result.api_calls += verdict.api_calls;
                    result.dimension_scores = verdict.dimension_scores;
                    result.overall_score = Some(verdict.overall_score);
                    result.base_score = Some(verdict.base_score);
                    result.recognition_score = Some(verdict.recognition_score);
                    result.judge_model = Some(verdict.judge_model);
                }
                Err(e) => {
                    // The trial stays successful; the scores stay null so
                    // `evaluate --follow` can retry.
                    TraceEvent::JudgeFallback {
                        run_id: self.run_id.clone(),
                        scenario_id: scenario.id.clone(),
                        profile_name: profile.name.clone(),
                        reason: e.to_string(),
                    }
                    .emit();
                }
            }
        }

        // Store commit first, journal append second.
        if let Err(e) = self.store.store_result(&result, false) {
            tracing::error!(error = %e, "store commit failed; trial lost until resume");
            self.append_error(&scenario.id, &profile.name, attempt, &e.to_string());
            return TrialFate::Errored;
        }
        if let Err(e) = self.progress.append(&ProgressEvent::TestComplete {
            ts: Utc::now(),
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            profile_name: profile.name.clone(),
            attempt,
            success: result.success,
            overall_score: result.overall_score,
            latency_ms: Some(result.latency_ms),
        }) {
            tracing::warn!(error = %e, "progress append failed");
        }
        TraceEvent::TrialCommitted {
            run_id: self.run_id.clone(),
            scenario_id: scenario.id.clone(),
            profile_name: profile.name.clone(),
            success: result.success,
            overall_score: result.overall_score,
        }
        .emit();

        if result.success {
            TrialFate::Succeeded
        } else {
            TrialFate::Failed
        }
    }

    fn append_error(&self, scenario_id: &str, profile_name: &str, attempt: u32, message: &str) {
        if let Err(e) = self.progress.append(&ProgressEvent::TestError {
            ts: Utc::now(),
            scenario_id: scenario_id.to_owned(),
            profile_name: profile_name.to_owned(),
            attempt,
            error_message: message.to_owned(),
        }) {
            tracing::warn!(error = %e, "progress append failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared judging helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load a stored transcript and judge it. `None` means "could not judge" —
/// the caller decides whether that is a skip or a retry-later.
async fn rejudge_one(
    judge: &Judge,
    transcripts: &TranscriptStore,
    scenario: &Scenario,
    result: &TrialResult,
) -> Option<crate::judge::JudgeVerdict> {
    let dialogue_id = result.dialogue_id.as_deref()?;
    let transcript = match transcripts.read(dialogue_id) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(dialogue_id, error = %e, "transcript unavailable");
            return None;
        }
    };
    let suggestions = transcript.suggestions();
    match judge.score(scenario, &transcript, &suggestions).await {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            tracing::warn!(dialogue_id, error = %e, "judge pass failed");
            None
        }
    }
}
