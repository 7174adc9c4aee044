//! Backend registry — one adapter instance per configured provider.

use std::collections::HashMap;
use std::sync::Arc;

use tb_domain::config::{ModelsConfig, ProviderKind, RoleConfig};
use tb_domain::error::{Error, Result};
use tb_domain::trace::TraceEvent;

use crate::anthropic::AnthropicBackend;
use crate::openai_compat::OpenAiCompatBackend;
use crate::retry::call_with_retry;
use crate::traits::{BackendReply, BackendRequest, ChatMessage, ModelBackend};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds one backend per provider id.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
    max_retries: u32,
}

impl BackendRegistry {
    /// An empty registry with the given retry budget. Backends are added
    /// with [`BackendRegistry::insert`].
    pub fn new(max_retries: u32) -> Self {
        Self {
            backends: HashMap::new(),
            max_retries,
        }
    }

    /// Build adapters for every configured provider.
    ///
    /// Fails fast on the first provider whose API key is missing — a run
    /// that cannot call its models should not start.
    pub fn from_config(models: &ModelsConfig) -> Result<Self> {
        let mut backends: HashMap<String, Arc<dyn ModelBackend>> = HashMap::new();
        for cfg in &models.providers {
            let backend: Arc<dyn ModelBackend> = match cfg.kind {
                ProviderKind::Anthropic => Arc::new(AnthropicBackend::from_config(cfg)?),
                ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatBackend::from_config(cfg)?),
            };
            backends.insert(cfg.id.clone(), backend);
        }
        tracing::info!(providers = backends.len(), "backend registry ready");
        Ok(Self {
            backends,
            max_retries: models.max_retries,
        })
    }

    /// Register a backend directly. Test harnesses use this to inject fakes.
    pub fn insert(&mut self, backend: Arc<dyn ModelBackend>) {
        self.backends
            .insert(backend.provider_id().to_owned(), backend);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ModelBackend>> {
        self.backends.get(provider_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Bind a role to its backend, applying the role's model and limits.
    pub fn bind(&self, role_name: &str, role: &RoleConfig) -> Result<RoleBinding> {
        let backend = self.get(&role.provider).ok_or_else(|| {
            Error::Config(format!(
                "role '{role_name}' references unknown provider '{}'",
                role.provider
            ))
        })?;
        Ok(RoleBinding {
            role_name: role_name.to_owned(),
            backend,
            config: role.clone(),
            max_retries: self.max_retries,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Role binding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A model role resolved to a concrete backend + limits.
///
/// This is the only surface the dialogue engine and judge call through; it
/// applies the role's limits, the transport retry policy, and emits the
/// per-call trace event.
#[derive(Clone)]
pub struct RoleBinding {
    pub role_name: String,
    backend: Arc<dyn ModelBackend>,
    pub config: RoleConfig,
    max_retries: u32,
}

impl std::fmt::Debug for RoleBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleBinding")
            .field("role_name", &self.role_name)
            .field("provider_id", &self.backend.provider_id())
            .field("config", &self.config)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl RoleBinding {
    /// Construct a binding directly from parts (tests and overrides).
    pub fn new(role_name: &str, backend: Arc<dyn ModelBackend>, config: RoleConfig, max_retries: u32) -> Self {
        Self {
            role_name: role_name.to_owned(),
            backend,
            config,
            max_retries,
        }
    }

    /// A binding for the same backend with a different model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            config: self.config.with_model(model),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One completion call with retries. Returns the reply and the number of
    /// attempts actually made (for the trial's api-call accounting).
    pub async fn call(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<(BackendReply, u32)> {
        let req = BackendRequest {
            model: self.config.model.clone(),
            system_prompt: system_prompt.to_owned(),
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            timeout_ms: self.config.timeout_ms,
        };
        let (reply, attempts) = call_with_retry(self.backend.as_ref(), &req, self.max_retries).await?;
        TraceEvent::BackendCall {
            provider: self.backend.provider_id().to_owned(),
            model: reply.model.clone(),
            role: self.role_name.clone(),
            attempt: attempts,
            duration_ms: reply.latency_ms,
            prompt_tokens: Some(reply.usage.prompt_tokens),
            completion_tokens: Some(reply.usage.completion_tokens),
        }
        .emit();
        Ok((reply, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Usage;

    struct EchoBackend;

    #[async_trait::async_trait]
    impl ModelBackend for EchoBackend {
        async fn call(&self, req: BackendRequest) -> Result<BackendReply> {
            Ok(BackendReply {
                content: format!("echo: {}", req.messages.last().map(|m| m.content.as_str()).unwrap_or("")),
                usage: Usage::default(),
                latency_ms: 1,
                model: req.model,
            })
        }

        fn provider_id(&self) -> &str {
            "echo"
        }
    }

    fn role() -> RoleConfig {
        RoleConfig {
            provider: "echo".into(),
            model: "echo-1".into(),
            max_tokens: 64,
            temperature: 0.0,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn bind_unknown_provider_is_config_error() {
        let registry = BackendRegistry::default();
        let err = registry.bind("tutor_ego", &role()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn binding_routes_through_backend() {
        let mut registry = BackendRegistry::default();
        registry.insert(Arc::new(EchoBackend));
        let binding = registry.bind("tutor_ego", &role()).unwrap();
        let (reply, attempts) = binding.call("sys", &[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply.content, "echo: hi");
        assert_eq!(attempts, 1);
        assert_eq!(reply.model, "echo-1");
    }

    #[test]
    fn with_model_rebinds_model_only() {
        let mut registry = BackendRegistry::default();
        registry.insert(Arc::new(EchoBackend));
        let binding = registry.bind("judge", &role()).unwrap();
        let other = binding.with_model("echo-2");
        assert_eq!(other.model(), "echo-2");
        assert_eq!(other.role_name, "judge");
        assert_eq!(binding.model(), "echo-1");
    }
}
