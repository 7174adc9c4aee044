//! Read-only commands: `runs`, `report`, `status`, `watch`, `transcript`.

use std::collections::BTreeMap;

use tb_domain::record::RunStatus;
use tb_store::{CellOutcome, ProgressGrid, ScoreColumn};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn runs(state: &AppState, status: Option<&str>, limit: u32) -> anyhow::Result<i32> {
    let status = match status {
        Some(raw) => Some(
            RunStatus::parse(raw)
                .ok_or_else(|| anyhow::anyhow!("unknown status '{raw}' (running/completed/failed)"))?,
        ),
        None => None,
    };
    let summaries = state.store.list_runs(status, Some(limit))?;
    if summaries.is_empty() {
        println!("no runs");
        return Ok(0);
    }
    println!(
        "{:<28} {:<10} {:>9} {:>8}  description",
        "run", "status", "trials", "rows"
    );
    for s in summaries {
        println!(
            "{:<28} {:<10} {:>5}/{:<3} {:>8}  {}",
            s.run.run_id,
            s.run.status.as_str(),
            s.completed_trials,
            s.run.total_tests(),
            s.results_total,
            s.run.description,
        );
    }
    Ok(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn report(state: &AppState, run_id: &str) -> anyhow::Result<i32> {
    let run = state.run_or_bail(run_id)?;
    println!("run {} — {} ({})", run.run_id, run.description, run.status.as_str());

    let results = state.store.get_results(run_id, None, None)?;
    if results.is_empty() {
        println!("no results yet");
        return Ok(0);
    }

    // Per-profile aggregates over the latest row of each natural key.
    let mut latest: BTreeMap<(String, String, u32), &tb_domain::record::TrialResult> =
        BTreeMap::new();
    for r in &results {
        latest.insert(
            (r.scenario_id.clone(), r.profile_name.clone(), r.attempt),
            r,
        );
    }

    #[derive(Default)]
    struct Agg {
        trials: u32,
        ok: u32,
        overall: Vec<f64>,
        base: Vec<f64>,
        recognition: Vec<f64>,
    }
    let mut per_profile: BTreeMap<String, Agg> = BTreeMap::new();
    for r in latest.values() {
        let agg = per_profile.entry(r.profile_name.clone()).or_default();
        agg.trials += 1;
        if r.success {
            agg.ok += 1;
        }
        if let Some(s) = r.overall_score {
            agg.overall.push(s);
        }
        if let Some(s) = r.base_score {
            agg.base.push(s);
        }
        if let Some(s) = r.recognition_score {
            agg.recognition.push(s);
        }
    }

    println!(
        "\n{:<32} {:>6} {:>8} {:>8} {:>8} {:>8}",
        "profile", "ok", "overall", "base", "recog", "n"
    );
    for (profile, agg) in &per_profile {
        println!(
            "{:<32} {:>3}/{:<3} {:>8} {:>8} {:>8} {:>8}",
            profile,
            agg.ok,
            agg.trials,
            fmt_mean(&agg.overall),
            fmt_mean(&agg.base),
            fmt_mean(&agg.recognition),
            agg.overall.len(),
        );
    }

    let cells = state.store.get_factorial_cell_data(run_id, ScoreColumn::Overall)?;
    if !cells.is_empty() {
        println!("\nfactorial cells (recognition, multi-tutor, psych-learner):");
        for (key, scores) in &cells {
            println!("  {key}  n={:<3} mean={}", scores.len(), fmt_mean(scores));
        }
    }
    Ok(0)
}

fn fmt_mean(scores: &[f64]) -> String {
    if scores.is_empty() {
        "-".into()
    } else {
        format!("{:.2}", scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// status / watch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn status(state: &AppState, run_id: &str) -> anyhow::Result<i32> {
    let grid = ProgressGrid::from_file(&state.progress_path(run_id))?;
    if grid.scenarios.is_empty() {
        println!("no progress journal for run {run_id}");
        return Ok(1);
    }
    print!("{}", render_grid(run_id, &grid));
    Ok(0)
}

/// `watch` reads only the journal, never the database, so it can run beside
/// an active scheduler without contention.
pub async fn watch(state: &AppState, run_id: &str, refresh_ms: u64) -> anyhow::Result<i32> {
    use std::io::Write;
    loop {
        let grid = ProgressGrid::from_file(&state.progress_path(run_id))?;
        // Clear screen between renders.
        print!("\x1b[2J\x1b[H{}", render_grid(run_id, &grid));
        std::io::stdout().flush().ok();
        if grid.run_complete {
            return Ok(0);
        }
        tokio::time::sleep(std::time::Duration::from_millis(refresh_ms.max(100))).await;
    }
}

/// Render the scenario × profile grid. Each cell is blank (not started), a
/// score, `ok` (unjudged pass), `FAIL`, or `ERR`.
fn render_grid(run_id: &str, grid: &ProgressGrid) -> String {
    let mut out = format!(
        "run {run_id} — {}/{} terminal events{}\n\n",
        grid.completed_events + grid.error_events,
        grid.total_tests,
        if grid.run_complete { " (complete)" } else { "" }
    );

    let scenario_width = grid
        .scenarios
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(8)
        .max(8);
    out.push_str(&format!("{:<scenario_width$}", "scenario"));
    for (i, _) in grid.profiles.iter().enumerate() {
        out.push_str(&format!(" {:>6}", format!("c{}", i + 1)));
    }
    out.push('\n');

    for scenario in &grid.scenarios {
        out.push_str(&format!("{scenario:<scenario_width$}"));
        for profile in &grid.profiles {
            let cell = match grid.outcome(scenario, profile) {
                None => String::new(),
                Some(CellOutcome::Pass(Some(score))) => format!("{score:.1}"),
                Some(CellOutcome::Pass(None)) => "ok".into(),
                Some(CellOutcome::Fail) => "FAIL".into(),
                Some(CellOutcome::Error) => "ERR".into(),
            };
            out.push_str(&format!(" {cell:>6}"));
        }
        out.push('\n');
    }

    out.push('\n');
    for (i, profile) in grid.profiles.iter().enumerate() {
        out.push_str(&format!("  c{} = {profile}\n", i + 1));
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn transcript(state: &AppState, dialogue_id: &str) -> anyhow::Result<i32> {
    let t = state.transcripts.read(dialogue_id)?;
    println!(
        "dialogue {} — scenario {} / profile {} ({} tutor, {} learner)",
        t.dialogue_id, t.scenario_id, t.profile_name, t.tutor_architecture, t.learner_architecture
    );
    println!(
        "{} turn(s), {}\n",
        t.total_turns,
        if t.completed { "completed" } else { "UNFINISHED" }
    );
    for entry in &t.entries {
        let agent = serde_json::to_value(entry.agent)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "unknown".into());
        let action = serde_json::to_value(entry.action)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "unknown".into());
        let mut markers = Vec::new();
        if entry.forced_emission {
            markers.push("forced_emission");
        }
        if entry.parse_failure {
            markers.push("parse_failure");
        }
        if let Some(approved) = entry.approved {
            markers.push(if approved { "approved" } else { "rejected" });
        }
        let marker_str = if markers.is_empty() {
            String::new()
        } else {
            format!(" [{}]", markers.join(", "))
        };
        // Indent internal deliberation so the external dialogue reads
        // straight down the left margin.
        let indent = if entry.agent.is_deliberation() { "    " } else { "" };
        println!(
            "{indent}[t{} {agent}/{action}]{marker_str} {}",
            entry.turn, entry.content
        );
    }
    Ok(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tb_domain::progress::ProgressEvent;

    fn grid() -> ProgressGrid {
        let events = vec![
            ProgressEvent::RunStart {
                ts: Utc::now(),
                run_id: "run-x".into(),
                scenarios: vec!["s1".into(), "s2".into()],
                profiles: vec!["cell_1_base_single_unified".into(), "cell_2_base_single_psych".into()],
                total_tests: 4,
            },
            ProgressEvent::TestComplete {
                ts: Utc::now(),
                scenario_id: "s1".into(),
                scenario_name: "S1".into(),
                profile_name: "cell_1_base_single_unified".into(),
                attempt: 1,
                success: true,
                overall_score: Some(7.5),
                latency_ms: Some(10),
            },
            ProgressEvent::TestComplete {
                ts: Utc::now(),
                scenario_id: "s1".into(),
                scenario_name: "S1".into(),
                profile_name: "cell_2_base_single_psych".into(),
                attempt: 1,
                success: false,
                overall_score: None,
                latency_ms: None,
            },
            ProgressEvent::TestError {
                ts: Utc::now(),
                scenario_id: "s2".into(),
                profile_name: "cell_1_base_single_unified".into(),
                attempt: 1,
                error_message: "boom".into(),
            },
        ];
        ProgressGrid::from_events(&events)
    }

    #[test]
    fn grid_renders_scores_fail_err_and_blank() {
        let rendered = render_grid("run-x", &grid());
        assert!(rendered.contains("7.5"));
        assert!(rendered.contains("FAIL"));
        assert!(rendered.contains("ERR"));
        assert!(rendered.contains("3/4 terminal events"));
        // Legend maps the short column names back to profiles.
        assert!(rendered.contains("c1 = cell_1_base_single_unified"));
    }

    #[test]
    fn mean_formatting() {
        assert_eq!(fmt_mean(&[]), "-");
        assert_eq!(fmt_mean(&[6.0, 8.0]), "7.00");
    }
}
