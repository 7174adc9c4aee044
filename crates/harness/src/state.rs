//! Shared handles for the CLI commands.
//!
//! No process-wide globals: every handle is built here once and passed
//! explicitly into whatever needs it. Backends (and therefore API keys) are
//! only resolved for commands that actually call models.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use tb_backend::BackendRegistry;
use tb_domain::config::{Config, ConfigSeverity, ProfileCatalogue, ScenarioCatalogue};
use tb_domain::record::Run;
use tb_engine::Scheduler;
use tb_store::{EvalStore, TranscriptStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<EvalStore>,
    pub transcripts: Arc<TranscriptStore>,
}

impl AppState {
    /// Load the config (with env overrides), validate it, and open the
    /// stores. Validation errors are fatal; warnings are logged.
    pub fn init(config_path: &Path) -> anyhow::Result<Self> {
        let mut config = load_config(config_path)?;
        config.paths.apply_env_overrides();

        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
            anyhow::bail!(
                "config validation failed with {} error(s)",
                issues
                    .iter()
                    .filter(|i| i.severity == ConfigSeverity::Error)
                    .count()
            );
        }

        let store = Arc::new(
            EvalStore::open(&config.paths.database_path()).context("opening evaluation store")?,
        );
        let transcripts = Arc::new(
            TranscriptStore::new(&config.paths.dialogues_dir())
                .context("opening transcript store")?,
        );
        Ok(Self {
            config,
            store,
            transcripts,
        })
    }

    /// Build the scheduler; resolves every configured provider's API key.
    pub fn scheduler(&self) -> anyhow::Result<Scheduler> {
        let registry = Arc::new(
            BackendRegistry::from_config(&self.config.models)
                .context("initializing model backends")?,
        );
        Ok(Scheduler::new(
            self.store.clone(),
            self.transcripts.clone(),
            self.config.paths.progress_dir(),
            registry,
            self.config.models.clone(),
            self.config.defaults.clone(),
        ))
    }

    pub fn scenario_catalogue(&self) -> anyhow::Result<ScenarioCatalogue> {
        let path = &self.config.paths.scenarios_path;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario catalogue {}", path.display()))?;
        Ok(ScenarioCatalogue::from_yaml(&raw)?)
    }

    /// The scenario catalogue a stored run was generated against.
    ///
    /// Run metadata records the `TUTORBENCH_SCENARIOS` override in effect at
    /// plan time; rejudge and resume restore it so judging sees the rubric
    /// that was active then.
    pub fn scenario_catalogue_for_run(&self, run: &Run) -> anyhow::Result<ScenarioCatalogue> {
        if let Some(path) = run.metadata.get("scenarios_env").and_then(|v| v.as_str()) {
            tracing::info!(path, "restoring scenario catalogue from run metadata");
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading recorded scenario catalogue {path}"))?;
            return Ok(ScenarioCatalogue::from_yaml(&raw)?);
        }
        self.scenario_catalogue()
    }

    /// The profile catalogue; a missing file is an empty catalogue, which
    /// still serves factorial runs.
    pub fn profile_catalogue(&self) -> anyhow::Result<ProfileCatalogue> {
        let path = &self.config.paths.profiles_path;
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(ProfileCatalogue::from_yaml(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "no profile catalogue; only factorial cells are available"
                );
                Ok(ProfileCatalogue { profiles: vec![] })
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn progress_path(&self, run_id: &str) -> std::path::PathBuf {
        self.config
            .paths
            .progress_dir()
            .join(format!("{run_id}.jsonl"))
    }

    pub fn run_or_bail(&self, run_id: &str) -> anyhow::Result<Run> {
        self.store
            .get_run(run_id)?
            .ok_or_else(|| anyhow::anyhow!("unknown run '{run_id}'"))
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw).with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            anyhow::bail!(
                "config file {} not found (pass --config or create one)",
                path.display()
            )
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}
