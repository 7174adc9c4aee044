//! `evaluate` — judge the null-score backlog, optionally polling.

use tb_domain::record::RunStatus;

use crate::state::AppState;

pub async fn evaluate(
    state: &AppState,
    run_id: &str,
    follow: bool,
    refresh_ms: u64,
    model: Option<&str>,
    review: bool,
) -> anyhow::Result<i32> {
    let run = state.run_or_bail(run_id)?;
    let scenarios = state.scenario_catalogue_for_run(&run)?;
    let scheduler = state.scheduler()?;

    let mut total = 0usize;
    loop {
        let judged = scheduler
            .evaluate_pending(run_id, &scenarios, model, review)
            .await?;
        total += judged;
        if judged > 0 {
            println!("judged {judged} result(s) ({total} this session)");
        }

        if !follow {
            break;
        }
        let run = state.run_or_bail(run_id)?;
        let pending = state.store.results_needing_judgement(run_id)?.len();
        if run.status != RunStatus::Running && pending == 0 {
            println!("run {run_id} is {} and fully judged", run.status.as_str());
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(refresh_ms.max(100))).await;
    }
    Ok(0)
}
