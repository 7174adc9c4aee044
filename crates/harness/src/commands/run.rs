//! `run` and `resume` — execute trials.

use tb_engine::{ProfileSelection, RunReport, RunSpec};

use crate::state::AppState;

use super::cancel_on_ctrl_c;

pub struct RunArgs {
    pub scenarios: Vec<String>,
    pub cluster: Option<String>,
    pub profiles: Vec<String>,
    pub all_profiles: bool,
    pub replications: u32,
    pub parallelism: Option<usize>,
    pub skip_rubric: bool,
    pub description: String,
    pub model: Option<String>,
    pub ego_model: Option<String>,
    pub superego_model: Option<String>,
    pub judge: Option<String>,
}

pub async fn run(state: &AppState, args: RunArgs) -> anyhow::Result<i32> {
    let profiles = if args.all_profiles {
        ProfileSelection::AllProfiles
    } else if !args.profiles.is_empty() {
        ProfileSelection::Named(args.profiles)
    } else {
        ProfileSelection::Factorial
    };

    // `--model` covers both tutor roles unless a role-specific override is
    // also present.
    let ego_model = args.ego_model.or_else(|| args.model.clone());
    let superego_model = args.superego_model.or(args.model);

    let spec = RunSpec {
        scenario_ids: args.scenarios,
        cluster: args.cluster,
        profiles,
        replications: args.replications.max(1),
        skip_rubric: args.skip_rubric,
        description: args.description,
        ego_model,
        superego_model,
        judge_model: args.judge,
    };
    let parallelism = args.parallelism.unwrap_or(state.config.defaults.parallelism);

    let scheduler = state.scheduler()?;
    let scenarios = state.scenario_catalogue()?;
    let profiles = state.profile_catalogue()?;
    let report = scheduler
        .run(spec, &scenarios, &profiles, parallelism, cancel_on_ctrl_c())
        .await?;
    print_report(&report);
    Ok(report.exit_code())
}

pub async fn resume(
    state: &AppState,
    run_id: &str,
    parallelism: Option<usize>,
    force: bool,
) -> anyhow::Result<i32> {
    let run = state.run_or_bail(run_id)?;
    let scheduler = state.scheduler()?;
    let scenarios = state.scenario_catalogue_for_run(&run)?;
    let profiles = state.profile_catalogue()?;
    let report = scheduler
        .resume(
            run_id,
            &scenarios,
            &profiles,
            parallelism,
            force,
            cancel_on_ctrl_c(),
        )
        .await?;
    print_report(&report);
    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    println!("run {}", report.run_id);
    println!(
        "  planned {}  executed {}  ok {}  failed {}  errors {}",
        report.planned, report.executed, report.succeeded, report.failed, report.errors
    );
    if report.cancelled {
        println!(
            "  cancelled — {} trial(s) left for `tutorbench resume {}`",
            report.planned - report.executed,
            report.run_id
        );
    }
}
