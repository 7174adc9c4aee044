//! `export` — write a run's results as JSON plus a markdown summary.
//!
//! The JSON export is the machine-readable contract: parsing it back yields
//! exactly the result set `get_results` returns.

use serde::{Deserialize, Serialize};

use tb_domain::record::{Run, TrialResult};

use crate::state::AppState;

/// The JSON export document.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunExport {
    pub run: Run,
    pub results: Vec<TrialResult>,
}

pub fn export(state: &AppState, run_id: &str) -> anyhow::Result<i32> {
    let run = state.run_or_bail(run_id)?;
    let results = state.store.get_results(run_id, None, None)?;
    let export_dir = &state.config.paths.exports_dir;
    std::fs::create_dir_all(export_dir)?;

    let json_path = export_dir.join(format!("{run_id}.json"));
    let doc = RunExport {
        run: run.clone(),
        results: results.clone(),
    };
    std::fs::write(&json_path, serde_json::to_string_pretty(&doc)?)?;

    let md_path = export_dir.join(format!("{run_id}.md"));
    std::fs::write(&md_path, render_markdown(&run, &results))?;

    println!("wrote {}", json_path.display());
    println!("wrote {}", md_path.display());
    Ok(0)
}

fn render_markdown(run: &Run, results: &[TrialResult]) -> String {
    let mut out = format!(
        "# Run {}\n\n{}\n\n- status: {}\n- created: {}\n- plan: {} scenario(s) × {} configuration(s)\n- result rows: {}\n\n",
        run.run_id,
        run.description,
        run.status.as_str(),
        run.created_at.to_rfc3339(),
        run.total_scenarios,
        run.total_configurations,
        results.len(),
    );
    out.push_str("| scenario | profile | attempt | success | overall | base | recognition | judge |\n");
    out.push_str("|---|---|---|---|---|---|---|---|\n");
    for r in results {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            r.scenario_id,
            r.profile_name,
            r.attempt,
            r.success,
            fmt_opt(r.overall_score),
            fmt_opt(r.base_score),
            fmt_opt(r.recognition_score),
            r.judge_model.as_deref().unwrap_or("-"),
        ));
    }
    out
}

fn fmt_opt(score: Option<f64>) -> String {
    score.map_or_else(|| "-".into(), |s| format!("{s:.2}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tb_domain::record::RunStatus;

    fn sample() -> (Run, Vec<TrialResult>) {
        let run = Run {
            run_id: "run-20260801-120000".into(),
            description: "export test".into(),
            total_scenarios: 1,
            total_configurations: 1,
            status: RunStatus::Completed,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            metadata: serde_json::json!({"pid": 1}),
        };
        let result = TrialResult {
            id: Some(1),
            run_id: run.run_id.clone(),
            scenario_id: "s1".into(),
            scenario_name: "S1".into(),
            profile_name: "p1".into(),
            attempt: 1,
            provider: "anthropic".into(),
            ego_model: "m".into(),
            superego_model: None,
            dialogue_id: Some("d1".into()),
            latency_ms: 5,
            api_calls: 2,
            input_tokens: 10,
            output_tokens: 5,
            success: true,
            error_message: None,
            skip_rubric: false,
            dimension_scores: BTreeMap::new(),
            overall_score: Some(7.0),
            base_score: Some(7.0),
            recognition_score: Some(0.0),
            judge_model: Some("j".into()),
            cell: None,
            qualitative_assessment: None,
            blinded_assessment: None,
            created_at: Utc::now(),
        };
        (run, vec![result])
    }

    #[test]
    fn json_export_round_trips() {
        let (run, results) = sample();
        let doc = RunExport {
            run,
            results: results.clone(),
        };
        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: RunExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.results.len(), results.len());
        assert_eq!(back.results[0].overall_score, Some(7.0));
        assert_eq!(back.results[0].profile_name, "p1");
        assert_eq!(back.run.run_id, doc.run.run_id);
    }

    #[test]
    fn markdown_contains_one_row_per_result() {
        let (run, results) = sample();
        let md = render_markdown(&run, &results);
        assert!(md.contains("| s1 | p1 | 1 | true | 7.00 |"));
        assert!(md.contains("# Run run-20260801-120000"));
    }
}
