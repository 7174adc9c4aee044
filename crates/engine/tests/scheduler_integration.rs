//! End-to-end scheduler tests against scripted backends and real (temp)
//! stores: plan execution, factorial extraction, resume, rejudge history,
//! rate-limit retries, cancellation, and journal/store agreement.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tb_backend::{BackendRegistry, BackendReply, BackendRequest, ModelBackend, Usage};
use tb_domain::config::{
    ModelsConfig, ProfileCatalogue, RoleConfig, RunDefaults, ScenarioCatalogue,
};
use tb_domain::error::{Error, Result};
use tb_domain::progress::ProgressEvent;
use tb_domain::record::{CellCoord, RunStatus};
use tb_engine::{CancelToken, ProfileSelection, RunSpec, Scheduler};
use tb_store::{read_progress_events, CellOutcome, EvalStore, ProgressGrid, ScoreColumn, TranscriptStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Mode {
    /// Always succeed with this content.
    Ok(String),
    /// Succeed for the first `n` calls, then fail every call.
    FailAfter { n: u32, content: String },
    /// Rate-limit the first `n` calls (with a tiny reset hint), then succeed.
    RateLimited { n: u32, content: String },
}

struct FakeBackend {
    id: String,
    mode: Mode,
    calls: AtomicU32,
}

impl FakeBackend {
    fn ok(id: &str, content: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            mode: Mode::Ok(content.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn fail_after(id: &str, n: u32, content: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            mode: Mode::FailAfter {
                n,
                content: content.into(),
            },
            calls: AtomicU32::new(0),
        })
    }

    fn rate_limited(id: &str, n: u32, content: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            mode: Mode::RateLimited {
                n,
                content: content.into(),
            },
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ModelBackend for FakeBackend {
    async fn call(&self, req: BackendRequest) -> Result<BackendReply> {
        let call_no = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reply = |content: &str| BackendReply {
            content: content.to_owned(),
            usage: Usage {
                prompt_tokens: 20,
                completion_tokens: 10,
            },
            latency_ms: 2,
            model: req.model.clone(),
        };
        match &self.mode {
            Mode::Ok(content) => Ok(reply(content)),
            Mode::FailAfter { n, content } => {
                if call_no <= *n {
                    Ok(reply(content))
                } else {
                    Err(Error::Backend {
                        provider: self.id.clone(),
                        message: "worker lost".into(),
                    })
                }
            }
            Mode::RateLimited { n, content } => {
                if call_no <= *n {
                    Err(Error::RateLimit {
                        message: "429".into(),
                        retry_after_ms: Some(5),
                    })
                } else {
                    Ok(reply(content))
                }
            }
        }
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness setup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const JUDGE_VERDICT: &str = r#"{"dimensions": {"accuracy": {"score": 7, "reasoning": "fine"}},
  "required_elements": {}, "forbidden_elements": {}, "summary": "ok"}"#;
const APPROVAL: &str = r#"{"approved": true, "feedback": ""}"#;

fn role(provider: &str) -> RoleConfig {
    RoleConfig {
        provider: provider.into(),
        model: format!("{provider}-model"),
        max_tokens: 256,
        temperature: 0.0,
        timeout_ms: 5_000,
    }
}

fn models_config() -> ModelsConfig {
    let mut roles = HashMap::new();
    roles.insert("tutor_ego".to_string(), role("ego"));
    roles.insert("tutor_superego".to_string(), role("superego"));
    roles.insert("learner".to_string(), role("learner"));
    roles.insert("judge".to_string(), role("judge"));
    ModelsConfig {
        providers: vec![],
        roles,
        max_retries: 2,
    }
}

fn registry_with(ego: Arc<dyn ModelBackend>) -> Arc<BackendRegistry> {
    let mut registry = BackendRegistry::new(2);
    registry.insert(ego);
    registry.insert(FakeBackend::ok("superego", APPROVAL));
    registry.insert(FakeBackend::ok("learner", "tell me more"));
    registry.insert(FakeBackend::ok("judge", JUDGE_VERDICT));
    Arc::new(registry)
}

struct Harness {
    store: Arc<EvalStore>,
    scheduler: Scheduler,
    progress_dir: std::path::PathBuf,
}

/// Build a scheduler harness rooted at `path`. The caller owns the temp
/// directory, so a harness can be dropped and rebuilt against the same
/// state (the resume-as-a-new-process tests rely on this).
fn harness(path: &Path, ego: Arc<dyn ModelBackend>) -> Harness {
    harness_at(path, ego, 4)
}

fn harness_at(path: &Path, ego: Arc<dyn ModelBackend>, parallelism: usize) -> Harness {
    let store = Arc::new(EvalStore::open(&path.join("evaluations.db")).unwrap());
    let transcripts = Arc::new(TranscriptStore::new(&path.join("tutor-dialogues")).unwrap());
    let progress_dir = path.join("eval-progress");
    let scheduler = Scheduler::new(
        store.clone(),
        transcripts,
        progress_dir.clone(),
        registry_with(ego),
        models_config(),
        RunDefaults {
            replications: 1,
            parallelism,
            max_turns: 8,
            stale_after_minutes: 120,
        },
    );
    Harness {
        store,
        scheduler,
        progress_dir,
    }
}

fn scenario_catalogue(count: usize) -> ScenarioCatalogue {
    let mut yaml = String::from("scenarios:\n");
    for i in 1..=count {
        yaml.push_str(&format!(
            "  - {{ id: s{i}, name: Scenario {i}, context: \"hello {i}\", rubric: {{ dimensions: [{{ name: accuracy }}], expected_behaviour: probe }} }}\n"
        ));
    }
    ScenarioCatalogue::from_yaml(&yaml).unwrap()
}

fn named_profiles(count: usize) -> ProfileCatalogue {
    let mut yaml = String::from("profiles:\n");
    for i in 1..=count {
        yaml.push_str(&format!("  - {{ name: p{i} }}\n"));
    }
    ProfileCatalogue::from_yaml(&yaml).unwrap()
}

fn cell_one_catalogue() -> ProfileCatalogue {
    ProfileCatalogue::from_yaml("profiles:\n  - { name: cell_1_base_single_unified }\n").unwrap()
}

fn progress_path(h: &Harness, run_id: &str) -> std::path::PathBuf {
    h.progress_dir.join(format!("{run_id}.jsonl"))
}

fn empty_profiles() -> ProfileCatalogue {
    ProfileCatalogue { profiles: vec![] }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_trial_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeBackend::ok("ego", "welcome, what have you tried?"),
    );
    let spec = RunSpec {
        scenario_ids: vec!["s1".into()],
        profiles: ProfileSelection::Named(vec!["cell_1_base_single_unified".into()]),
        replications: 1,
        description: "happy path".into(),
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(
            spec,
            &scenario_catalogue(1),
            &cell_one_catalogue(),
            1,
            CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.exit_code(), 0);

    let results = h.store.get_results(&report.run_id, None, None).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.overall_score, Some(7.0));
    assert_eq!(result.cell, CellCoord::from_index(1));
    assert!(result.dialogue_id.is_some());

    let run = h.store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let events = read_progress_events(&progress_path(&h, &report.run_id)).unwrap();
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            ProgressEvent::RunStart { .. } => "run_start",
            ProgressEvent::TestStart { .. } => "test_start",
            ProgressEvent::TestComplete { .. } => "test_complete",
            ProgressEvent::TestError { .. } => "test_error",
            ProgressEvent::RunComplete { .. } => "run_complete",
        })
        .collect();
    assert_eq!(kinds, vec!["run_start", "test_start", "test_complete", "run_complete"]);
}

#[tokio::test]
async fn factorial_plan_produces_full_cell_data() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), FakeBackend::ok("ego", "reply"));
    let spec = RunSpec {
        scenario_ids: vec!["s1".into()],
        profiles: ProfileSelection::Factorial,
        replications: 2,
        description: "factorial".into(),
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(
            spec,
            &scenario_catalogue(1),
            &empty_profiles(),
            4,
            CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, 16);
    let results = h.store.get_results(&report.run_id, None, None).unwrap();
    assert_eq!(results.len(), 16);

    // Cell tags on each row match the bits encoded in the profile name.
    for result in &results {
        let cell = result.cell.unwrap();
        assert_eq!(cell.label(), result.profile_name);
    }

    let data = h
        .store
        .get_factorial_cell_data(&report.run_id, ScoreColumn::Overall)
        .unwrap();
    assert_eq!(data.len(), 8, "every non-empty cell present");
    for scores in data.values() {
        assert_eq!(scores.len(), 2, "replications × |scenarios| scores per cell");
        assert!(scores.iter().all(|s| *s == 7.0));
    }

    let run = h.store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(run.total_tests(), 8, "total_tests is scenarios × configurations");
}

#[tokio::test]
async fn resume_after_partial_run_executes_only_the_remainder() {
    // 5 scenarios × 4 profiles: the ego backend dies after 7 calls, so 7
    // trials commit successfully and 13 fail.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    let h = harness_at(&path, FakeBackend::fail_after("ego", 7, "reply"), 1);
    let spec = RunSpec {
        profiles: ProfileSelection::Named(vec![
            "p1".into(),
            "p2".into(),
            "p3".into(),
            "p4".into(),
        ]),
        replications: 1,
        description: "crashy".into(),
        ..Default::default()
    };
    let scenarios = scenario_catalogue(5);
    let profiles = named_profiles(4);
    let report = h
        .scheduler
        .run(spec, &scenarios, &profiles, 1, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 7);
    assert_eq!(report.failed, 13);
    assert_eq!(report.exit_code(), 2);
    let run_id = report.run_id.clone();
    drop(h);

    // A new process with a healthy backend resumes the same run.
    let h2 = harness_at(&path, FakeBackend::ok("ego", "reply"), 1);

    let resumed = h2
        .scheduler
        .resume(&run_id, &scenarios, &profiles, Some(1), true, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.executed, 13, "only the remainder runs");
    assert_eq!(resumed.succeeded, 13);

    // 20 distinct successful natural keys in the store.
    let success_keys: std::collections::HashSet<_> = h2
        .store
        .get_results(&run_id, None, None)
        .unwrap()
        .into_iter()
        .filter(|r| r.success)
        .map(|r| (r.scenario_id, r.profile_name, r.attempt))
        .collect();
    assert_eq!(success_keys.len(), 20);

    // The journal's first run_start still carries the original plan.
    let events =
        read_progress_events(&path.join("eval-progress").join(format!("{run_id}.jsonl"))).unwrap();
    let grid = ProgressGrid::from_events(&events);
    assert_eq!(grid.total_tests, 20);
    assert!(grid.run_complete);

    // Property: grid-from-journal and store agree on latest outcomes.
    for ((scenario, profile), outcome) in &grid.cells {
        let rows = h2
            .store
            .get_results(&run_id, Some(scenario.as_str()), Some(profile.as_str()))
            .unwrap();
        let latest = rows.last().unwrap();
        match outcome {
            CellOutcome::Pass(score) => {
                assert!(latest.success);
                assert_eq!(*score, latest.overall_score);
            }
            CellOutcome::Fail => assert!(!latest.success),
            CellOutcome::Error => panic!("no worker-level errors expected"),
        }
    }

    // Resuming the now-complete run again is a no-op.
    let idempotent = h2
        .scheduler
        .resume(&run_id, &scenarios, &profiles, Some(1), true, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(idempotent.executed, 0);
    assert_eq!(
        h2.store.get_results(&run_id, None, None).unwrap().len(),
        20,
        "no new rows from an idempotent resume"
    );
}

#[tokio::test]
async fn resume_without_force_refuses_completed_runs() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), FakeBackend::ok("ego", "reply"));
    let scenarios = scenario_catalogue(1);
    let profiles = named_profiles(1);
    let spec = RunSpec {
        profiles: ProfileSelection::Named(vec!["p1".into()]),
        replications: 1,
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(spec, &scenarios, &profiles, 1, CancelToken::new())
        .await
        .unwrap();

    let err = h
        .scheduler
        .resume(&report.run_id, &scenarios, &profiles, None, false, CancelToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--force"));
}

#[tokio::test]
async fn rejudge_appends_history_and_overwrite_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), FakeBackend::ok("ego", "reply"));
    let scenarios = scenario_catalogue(1);
    let spec = RunSpec {
        scenario_ids: vec!["s1".into()],
        profiles: ProfileSelection::Factorial,
        replications: 1,
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(spec, &scenarios, &empty_profiles(), 4, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 8);

    // Default: new rows, same natural keys, distinguishable by judge model.
    let rejudged = h
        .scheduler
        .rejudge(&report.run_id, &scenarios, Some("judge-two"), None, false)
        .await
        .unwrap();
    assert_eq!(rejudged.rejudged, 8);
    let rows = h.store.get_results(&report.run_id, None, None).unwrap();
    assert_eq!(rows.len(), 16);
    let keys: std::collections::HashSet<_> = rows
        .iter()
        .map(|r| (r.scenario_id.clone(), r.profile_name.clone(), r.attempt))
        .collect();
    assert_eq!(keys.len(), 8);
    let judge_models: std::collections::HashSet<_> =
        rows.iter().filter_map(|r| r.judge_model.clone()).collect();
    assert!(judge_models.contains("judge-two"));
    assert!(judge_models.len() >= 2);

    // Overwrite: row count unchanged, judge model updated in place.
    let overwritten = h
        .scheduler
        .rejudge(&report.run_id, &scenarios, Some("judge-three"), None, true)
        .await
        .unwrap();
    assert_eq!(overwritten.rejudged, 8);
    let rows = h.store.get_results(&report.run_id, None, None).unwrap();
    assert_eq!(rows.len(), 16);
    assert!(rows
        .iter()
        .filter(|r| r.judge_model.as_deref() == Some("judge-three"))
        .count()
        == 8);
}

#[tokio::test]
async fn rate_limited_backend_retries_and_accounts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), FakeBackend::rate_limited("ego", 2, "eventually"));
    let spec = RunSpec {
        profiles: ProfileSelection::Named(vec!["p1".into()]),
        replications: 1,
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(
            spec,
            &scenario_catalogue(1),
            &named_profiles(1),
            1,
            CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let result = &h.store.get_results(&report.run_id, None, None).unwrap()[0];
    assert!(result.success);
    assert!(
        result.api_calls >= 3,
        "two rate-limited attempts plus the success must all be accounted: {}",
        result.api_calls
    );
}

#[tokio::test]
async fn parallelism_does_not_change_the_outcome_multiset() {
    let run_with = |parallelism: usize| async move {
        let dir = tempfile::tempdir().unwrap();
        let h = harness_at(dir.path(), FakeBackend::ok("ego", "reply"), parallelism);
        let spec = RunSpec {
            profiles: ProfileSelection::Factorial,
            replications: 2,
            ..Default::default()
        };
        let report = h
            .scheduler
            .run(
                spec,
                &scenario_catalogue(2),
                &empty_profiles(),
                parallelism,
                CancelToken::new(),
            )
            .await
            .unwrap();
        let mut outcomes: Vec<(String, String, u32, bool, Option<String>)> = h
            .store
            .get_results(&report.run_id, None, None)
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    r.scenario_id,
                    r.profile_name,
                    r.attempt,
                    r.success,
                    r.overall_score.map(|s| format!("{s:.3}")),
                )
            })
            .collect();
        outcomes.sort();
        outcomes
    };

    let sequential = run_with(1).await;
    let parallel = run_with(4).await;
    assert_eq!(sequential.len(), 32);
    assert_eq!(sequential, parallel);
}

#[tokio::test]
async fn skip_rubric_then_evaluate_attaches_scores() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), FakeBackend::ok("ego", "reply"));
    let scenarios = scenario_catalogue(1);
    let profiles = named_profiles(2);
    let spec = RunSpec {
        profiles: ProfileSelection::Named(vec!["p1".into(), "p2".into()]),
        replications: 1,
        skip_rubric: true,
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(spec, &scenarios, &profiles, 2, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);

    let before = h.store.get_results(&report.run_id, None, None).unwrap();
    assert!(before.iter().all(|r| r.skip_rubric && r.overall_score.is_none()));

    let judged = h
        .scheduler
        .evaluate_pending(&report.run_id, &scenarios, None, true)
        .await
        .unwrap();
    assert_eq!(judged, 2);

    let after = h.store.get_results(&report.run_id, None, None).unwrap();
    assert_eq!(after.len(), 2, "evaluate updates in place");
    assert!(after.iter().all(|r| r.overall_score == Some(7.0)));
    for row in &after {
        let evals = h.store.get_interaction_evals(row.id.unwrap()).unwrap();
        assert_eq!(evals.len(), 1, "--review stores an interaction eval");
    }

    // Nothing left to judge on the second pass.
    let judged_again = h
        .scheduler
        .evaluate_pending(&report.run_id, &scenarios, None, false)
        .await
        .unwrap();
    assert_eq!(judged_again, 0);
}

#[tokio::test]
async fn pre_cancelled_run_commits_nothing_and_stays_open() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), FakeBackend::ok("ego", "reply"));
    let cancel = CancelToken::new();
    cancel.cancel();
    let spec = RunSpec {
        profiles: ProfileSelection::Factorial,
        replications: 1,
        ..Default::default()
    };
    let report = h
        .scheduler
        .run(spec, &scenario_catalogue(1), &empty_profiles(), 4, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.executed, 0);
    assert!(h.store.get_results(&report.run_id, None, None).unwrap().is_empty());
    // The run stays running so a resume can pick the remainder up.
    assert_eq!(
        h.store.get_run(&report.run_id).unwrap().unwrap().status,
        RunStatus::Running
    );
}
