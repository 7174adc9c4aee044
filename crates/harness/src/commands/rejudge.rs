//! `rejudge` — re-apply the judge to stored results.

use crate::state::AppState;

pub async fn rejudge(
    state: &AppState,
    run_id: &str,
    judge: Option<&str>,
    scenario: Option<&str>,
    overwrite: bool,
) -> anyhow::Result<i32> {
    let run = state.run_or_bail(run_id)?;
    // Judging depends on the rubric that was in effect for the run.
    let scenarios = state.scenario_catalogue_for_run(&run)?;
    let scheduler = state.scheduler()?;
    let report = scheduler
        .rejudge(run_id, &scenarios, judge, scenario, overwrite)
        .await?;

    println!(
        "rejudged {} result(s) ({}), skipped {}",
        report.rejudged,
        if report.overwrite {
            "updated in place"
        } else {
            "history appended"
        },
        report.skipped
    );
    Ok(if report.skipped > 0 { 1 } else { 0 })
}
