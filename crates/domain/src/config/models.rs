use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model backend system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Registered providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Model roles: tutor_ego, tutor_superego, learner, judge (+ custom).
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    #[serde(default = "d_2")]
    pub max_retries: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            roles: HashMap::new(),
            max_retries: d_2(),
        }
    }
}

impl ModelsConfig {
    pub fn role(&self, name: &str) -> Option<&RoleConfig> {
        self.roles.get(name)
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id referenced from role configs.
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key. Keys never live in config.
    pub api_key_env: String,
    pub default_model: String,
}

/// Settings for one model role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Provider id from [`ModelsConfig::providers`].
    pub provider: String,
    pub model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    /// Hard wall-clock timeout for one call. Judge calls run long, so the
    /// judge role usually raises this.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl RoleConfig {
    /// A role config pointing at the same provider with a different model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_owned(),
            ..self.clone()
        }
    }
}

fn d_2() -> u32 {
    2
}
fn d_max_tokens() -> u32 {
    2048
}
fn d_temperature() -> f32 {
    0.7
}
fn d_timeout_ms() -> u64 {
    120_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_apply() {
        let role: RoleConfig = toml::from_str(
            r#"
            provider = "anthropic"
            model = "claude-sonnet-4-20250514"
            "#,
        )
        .unwrap();
        assert_eq!(role.max_tokens, 2048);
        assert_eq!(role.timeout_ms, 120_000);
        assert!((role.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn with_model_keeps_provider_and_limits() {
        let role = RoleConfig {
            provider: "anthropic".into(),
            model: "a".into(),
            max_tokens: 512,
            temperature: 0.1,
            timeout_ms: 5_000,
        };
        let other = role.with_model("b");
        assert_eq!(other.model, "b");
        assert_eq!(other.provider, "anthropic");
        assert_eq!(other.max_tokens, 512);
        assert_eq!(other.timeout_ms, 5_000);
    }

    #[test]
    fn provider_lookup_by_id() {
        let models = ModelsConfig {
            providers: vec![ProviderConfig {
                id: "local".into(),
                kind: ProviderKind::OpenaiCompat,
                base_url: "http://localhost:8000/v1".into(),
                api_key_env: "LOCAL_API_KEY".into(),
                default_model: "llama".into(),
            }],
            roles: HashMap::new(),
            max_retries: 2,
        };
        assert!(models.provider("local").is_some());
        assert!(models.provider("missing").is_none());
    }
}
