use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tutorbench — a factorial evaluation harness for AI tutoring agents.
#[derive(Debug, Parser)]
#[command(name = "tutorbench", version, about)]
pub struct Cli {
    /// Path to the harness configuration file.
    #[arg(long, global = true, default_value = "tutorbench.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a new evaluation run.
    Run {
        /// Scenario id; repeatable. Default: every scenario in the catalogue.
        #[arg(long = "scenario")]
        scenarios: Vec<String>,
        /// Restrict scenarios to one cluster tag.
        #[arg(long)]
        cluster: Option<String>,
        /// Profile name from the catalogue; repeatable.
        #[arg(long = "profile")]
        profiles: Vec<String>,
        /// Run every profile in the catalogue.
        #[arg(long, conflicts_with = "profiles")]
        all_profiles: bool,
        /// Run the eight factorial cells (the default when no profiles are
        /// named).
        #[arg(long, conflicts_with_all = ["profiles", "all_profiles"])]
        factorial: bool,
        /// Replications per (scenario, configuration) cell.
        #[arg(long = "runs", default_value_t = 1)]
        replications: u32,
        /// Worker pool size.
        #[arg(long)]
        parallelism: Option<usize>,
        /// Record trials without judging them (judge later with `evaluate`).
        #[arg(long)]
        skip_rubric: bool,
        /// Free-text run description.
        #[arg(long, default_value = "")]
        description: String,
        /// Model override for both tutor roles.
        #[arg(long)]
        model: Option<String>,
        /// Model override for the tutor ego only.
        #[arg(long)]
        ego_model: Option<String>,
        /// Model override for the tutor superego only.
        #[arg(long)]
        superego_model: Option<String>,
        /// Judge model override.
        #[arg(long)]
        judge: Option<String>,
    },

    /// Resume an incomplete run, executing only the remainder.
    Resume {
        run_id: String,
        #[arg(long)]
        parallelism: Option<usize>,
        /// Resume even if the run is marked completed.
        #[arg(long)]
        force: bool,
        /// Log at debug level for this invocation.
        #[arg(long)]
        verbose: bool,
    },

    /// Re-judge the existing results of a run.
    Rejudge {
        run_id: String,
        /// Judge model override.
        #[arg(long)]
        judge: Option<String>,
        /// Only rejudge results for one scenario.
        #[arg(long)]
        scenario: Option<String>,
        /// Update rows in place instead of appending judge history.
        #[arg(long)]
        overwrite: bool,
    },

    /// Judge trials that still have null scores (skip-rubric runs, judge
    /// failures).
    Evaluate {
        run_id: String,
        /// Keep polling until the run is complete and nothing is pending.
        #[arg(long)]
        follow: bool,
        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 5_000)]
        refresh: u64,
        /// Judge model override.
        #[arg(long)]
        model: Option<String>,
        /// Also store each verdict as an interaction evaluation.
        #[arg(long)]
        review: bool,
    },

    /// List runs with progress aggregates.
    Runs {
        /// Filter by status: running, completed, failed.
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Per-profile and per-cell score aggregates for a run.
    Report { run_id: String },

    /// One-shot scenario × profile completion grid.
    Status { run_id: String },

    /// Live-updating completion grid (reads the progress journal only).
    Watch {
        run_id: String,
        /// Refresh interval in milliseconds.
        #[arg(long, default_value_t = 2_000)]
        refresh: u64,
    },

    /// Pretty-print one stored dialogue transcript.
    Transcript { dialogue_id: String },

    /// Export a run's results as JSON + markdown.
    Export { run_id: String },

    /// Close runs whose process is dead and idle past the threshold.
    Cleanup {
        /// Idle threshold in minutes; defaults to `defaults.stale_after_minutes`.
        #[arg(long)]
        minutes: Option<i64>,
        /// Report what would be closed without closing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Reopen a completed run (completed → running).
    Revert { run_id: String },
}
