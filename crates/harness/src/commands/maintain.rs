//! Lifecycle maintenance: `cleanup` and `revert`.

use tb_domain::record::RunStatus;

use crate::state::AppState;

pub fn cleanup(state: &AppState, minutes: Option<i64>, dry_run: bool) -> anyhow::Result<i32> {
    let minutes = minutes.unwrap_or(state.config.defaults.stale_after_minutes);
    let closed = state.store.auto_complete_stale_runs(minutes, dry_run)?;
    if closed.is_empty() {
        println!("no stale runs");
    } else {
        for run_id in &closed {
            if dry_run {
                println!("would close {run_id}");
            } else {
                println!("closed {run_id}");
            }
        }
    }
    Ok(0)
}

pub fn revert(state: &AppState, run_id: &str) -> anyhow::Result<i32> {
    let run = state.run_or_bail(run_id)?;
    if run.status == RunStatus::Running {
        println!("run {run_id} is already running");
        return Ok(0);
    }
    state
        .store
        .update_run(run_id, Some(RunStatus::Running), None, None)?;
    println!("run {run_id}: {} -> running", run.status.as_str());
    Ok(0)
}
