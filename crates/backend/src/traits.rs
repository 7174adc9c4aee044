use tb_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Reply types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of conversation history sent to a backend.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Model identifier. Empty lets the provider use its default.
    pub model: String,
    /// System prompt; providers place it wherever their API wants it.
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard wall-clock timeout for the whole call.
    pub timeout_ms: u64,
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completed backend call.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub content: String,
    pub usage: Usage,
    pub latency_ms: u64,
    /// The model that actually produced the completion.
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements.
///
/// Implementations are provider-specific adapters (Anthropic,
/// OpenAI-compatible) that translate between the harness types and the wire
/// format of each provider's HTTP API. One call, one completion — the
/// harness never streams.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn call(&self, req: BackendRequest) -> Result<BackendReply>;

    /// A unique identifier for this backend instance.
    fn provider_id(&self) -> &str;
}
