mod cli;
mod commands;
mod state;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = matches!(cli.command, Command::Resume { verbose: true, .. });
    init_tracing(verbose);

    match dispatch(cli).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Fatal configuration / environment problems: exit 1.
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        "info,tb_engine=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let state = AppState::init(&cli.config)?;

    match cli.command {
        Command::Run {
            scenarios,
            cluster,
            profiles,
            all_profiles,
            factorial: _,
            replications,
            parallelism,
            skip_rubric,
            description,
            model,
            ego_model,
            superego_model,
            judge,
        } => {
            commands::run::run(
                &state,
                commands::run::RunArgs {
                    scenarios,
                    cluster,
                    profiles,
                    all_profiles,
                    replications,
                    parallelism,
                    skip_rubric,
                    description,
                    model,
                    ego_model,
                    superego_model,
                    judge,
                },
            )
            .await
        }
        Command::Resume {
            run_id,
            parallelism,
            force,
            verbose: _,
        } => commands::run::resume(&state, &run_id, parallelism, force).await,
        Command::Rejudge {
            run_id,
            judge,
            scenario,
            overwrite,
        } => {
            commands::rejudge::rejudge(
                &state,
                &run_id,
                judge.as_deref(),
                scenario.as_deref(),
                overwrite,
            )
            .await
        }
        Command::Evaluate {
            run_id,
            follow,
            refresh,
            model,
            review,
        } => {
            commands::evaluate::evaluate(&state, &run_id, follow, refresh, model.as_deref(), review)
                .await
        }
        Command::Runs { status, limit } => commands::inspect::runs(&state, status.as_deref(), limit),
        Command::Report { run_id } => commands::inspect::report(&state, &run_id),
        Command::Status { run_id } => commands::inspect::status(&state, &run_id),
        Command::Watch { run_id, refresh } => {
            commands::inspect::watch(&state, &run_id, refresh).await
        }
        Command::Transcript { dialogue_id } => commands::inspect::transcript(&state, &dialogue_id),
        Command::Export { run_id } => commands::export::export(&state, &run_id),
        Command::Cleanup { minutes, dry_run } => commands::maintain::cleanup(&state, minutes, dry_run),
        Command::Revert { run_id } => commands::maintain::revert(&state, &run_id),
    }
}
