mod models;
mod profiles;
mod scenarios;

pub use models::*;
pub use profiles::*;
pub use scenarios::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub defaults: RunDefaults,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filesystem layout. Every path can be overridden by an environment
/// variable so scripted runs and tests never touch the real data dirs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `evaluations.db`. Env: `TUTORBENCH_DATA_DIR`.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding transcripts and progress journals.
    /// Env: `TUTORBENCH_LOGS_DIR`.
    #[serde(default = "d_logs_dir")]
    pub logs_dir: PathBuf,
    /// Directory for export artifacts. Env: `TUTORBENCH_EXPORTS_DIR`.
    #[serde(default = "d_exports_dir")]
    pub exports_dir: PathBuf,
    /// Scenario catalogue (YAML). Env: `TUTORBENCH_SCENARIOS` — the value in
    /// effect is recorded in run metadata so resume/rejudge restore it.
    #[serde(default = "d_scenarios_path")]
    pub scenarios_path: PathBuf,
    /// Profile catalogue (YAML).
    #[serde(default = "d_profiles_path")]
    pub profiles_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            logs_dir: d_logs_dir(),
            exports_dir: d_exports_dir(),
            scenarios_path: d_scenarios_path(),
            profiles_path: d_profiles_path(),
        }
    }
}

impl PathsConfig {
    /// Apply `TUTORBENCH_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TUTORBENCH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TUTORBENCH_LOGS_DIR") {
            self.logs_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TUTORBENCH_EXPORTS_DIR") {
            self.exports_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TUTORBENCH_SCENARIOS") {
            self.scenarios_path = PathBuf::from(v);
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("evaluations.db")
    }

    pub fn dialogues_dir(&self) -> PathBuf {
        self.logs_dir.join("tutor-dialogues")
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.logs_dir.join("eval-progress")
    }
}

fn d_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn d_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn d_exports_dir() -> PathBuf {
    PathBuf::from("exports")
}
fn d_scenarios_path() -> PathBuf {
    PathBuf::from("catalogues/scenarios.yaml")
}
fn d_profiles_path() -> PathBuf {
    PathBuf::from("catalogues/profiles.yaml")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefaults {
    #[serde(default = "d_1")]
    pub replications: u32,
    #[serde(default = "d_4")]
    pub parallelism: usize,
    /// Hard cap on external dialogue turns regardless of scenario script.
    #[serde(default = "d_8")]
    pub max_turns: u32,
    /// Idle minutes before a dead run is eligible for auto-completion.
    #[serde(default = "d_120")]
    pub stale_after_minutes: i64,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            replications: d_1(),
            parallelism: d_4(),
            max_turns: d_8(),
            stale_after_minutes: d_120(),
        }
    }
}

fn d_1() -> u32 {
    1
}
fn d_4() -> usize {
    4
}
fn d_8() -> u32 {
    8
}
fn d_120() -> i64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.models.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "models.providers".into(),
                message: "no providers configured".into(),
            });
        }

        for role in ["tutor_ego", "learner", "judge"] {
            if !self.models.roles.contains_key(role) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("models.roles.{role}"),
                    message: "required role is not configured".into(),
                });
            }
        }
        if !self.models.roles.contains_key("tutor_superego") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "models.roles.tutor_superego".into(),
                message: "not configured — multi-agent tutor profiles will fall back to tutor_ego".into(),
            });
        }

        for (name, role) in &self.models.roles {
            if !self.models.providers.iter().any(|p| p.id == role.provider) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("models.roles.{name}.provider"),
                    message: format!("unknown provider '{}'", role.provider),
                });
            }
        }

        if self.defaults.parallelism == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "defaults.parallelism".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.defaults.max_turns == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "defaults.max_turns".into(),
                message: "must be at least 1".into(),
            });
        }

        issues
    }
}
