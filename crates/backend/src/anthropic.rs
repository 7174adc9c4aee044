//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API with the Anthropic-specific message
//! structure where system prompts go in a separate top-level `system` field.

use serde_json::Value;

use tb_domain::config::ProviderConfig;
use tb_domain::error::{Error, Result};

use crate::traits::{BackendReply, BackendRequest, ChatRole, ModelBackend, Usage};
use crate::util::{from_reqwest, resolve_api_key, retry_after_secs, status_error};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A model backend for the Anthropic Messages API.
pub struct AnthropicBackend {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
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

        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });
        if !req.system_prompt.is_empty() {
            body["system"] = Value::String(req.system_prompt.clone());
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(provider: &str, body: &Value, latency_ms: u64) -> Result<BackendReply> {
    let content = body
        .get("content")
        .and_then(|v| v.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| {
                    (b.get("type").and_then(|v| v.as_str()) == Some("text"))
                        .then(|| b.get("text").and_then(|v| v.as_str()))
                        .flatten()
                })
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if content.is_empty() {
        return Err(Error::Backend {
            provider: provider.to_owned(),
            message: "response contained no text blocks".into(),
        });
    }

    let usage = body
        .get("usage")
        .map(|u| Usage {
            prompt_tokens: u
                .get("input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: u
                .get("output_tokens")
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelBackend for AnthropicBackend {
    async fn call(&self, req: BackendRequest) -> Result<BackendReply> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req);

        tracing::debug!(provider = %self.id, url = %url, "anthropic call");

        let started = std::time::Instant::now();
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
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
