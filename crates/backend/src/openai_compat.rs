//! OpenAI-compatible adapter.
//!
//! Speaks the `/chat/completions` dialect shared by OpenAI, OpenRouter, and
//! most local inference servers. The system prompt rides as the first
//! message.

use serde_json::Value;

use tb_domain::config::ProviderConfig;
use tb_domain::error::{Error, Result};

use crate::traits::{BackendReply, BackendRequest, ChatRole, ModelBackend, Usage};
use crate::util::{from_reqwest, resolve_api_key, retry_after_secs, status_error};

/// A model backend for OpenAI-compatible chat completion APIs.
pub struct OpenAiCompatBackend {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a new backend from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.api_key_env)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.default_model.clone(),
            client,
        })
    }

    fn build_body(&self, req: &BackendRequest) -> Value {
        let model = if req.model.is_empty() {
            self.default_model.clone()
        } else {
            req.model.clone()
        };

        let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
        if !req.system_prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": req.system_prompt,
            }));
        }
        for m in &req.messages {
            messages.push(serde_json::json!({
                "role": match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                "content": m.content,
            }));
        }

        serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        })
    }
}

fn parse_response(provider: &str, body: &Value, latency_ms: u64) -> Result<BackendReply> {
    let content = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if content.is_empty() {
        return Err(Error::Backend {
            provider: provider.to_owned(),
            message: "response contained no message content".into(),
        });
    }

    let usage = body
        .get("usage")
        .map(|u| Usage {
            prompt_tokens: u
                .get("prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(BackendReply {
        content,
        usage,
        latency_ms,
        model,
    })
}

#[async_trait::async_trait]
impl ModelBackend for OpenAiCompatBackend {
    async fn call(&self, req: BackendRequest) -> Result<BackendReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        tracing::debug!(provider = %self.id, url = %url, "openai-compat call");

        let started = std::time::Instant::now();
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(std::time::Duration::from_millis(req.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let retry_after = retry_after_secs(resp.headers());
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        let latency_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            return Err(status_error(&self.id, status, retry_after, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_response(&self.id, &resp_json, latency_ms)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
