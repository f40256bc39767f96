//! The LLM client port consumed by every component that talks to a model:
//! the tutor, the evaluator, the rabbithole detector/agent, and the
//! transcription pipeline.
//!
//! Each of those bindings is a *distinct value* carrying its own immutable
//! system prompt — never a shared reference. That invariant is the one
//! called out by name in the design notes: the rabbithole agent must be
//! constructed with its own [`LlmClient`] instance, not handed the
//! tutor's.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn in the conversation sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatConfig {
    pub fn new(model: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self { model: model.into(), max_tokens, temperature }
    }
}

/// Token accounting returned alongside a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Full, non-streaming model response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub usage: Usage,
    pub stop_reason: String,
}

/// One increment of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content.
    TextDelta { text: String },
    /// Stream completed successfully.
    Done { usage: Usage, stop_reason: String },
    /// Stream failed mid-flight. The session loop surfaces this to the
    /// client as `error{kind, message}` and does not persist a partial
    /// assistant message.
    Error { kind: LlmErrorKind, message: String },
}

/// Classification used both to decide local retry policy and to populate
/// the wire `error{code}` field (see the error-handling design table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    Authentication,
    RateLimit,
    InvalidRequest,
    ServerError,
    Network,
    Timeout,
    Unknown,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Whether the error-handling design allows one local retry for this
    /// kind (evaluator/detector/transcription only — never the tutor stream).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            LlmErrorKind::RateLimit | LlmErrorKind::ServerError | LlmErrorKind::Network | LlmErrorKind::Timeout
        )
    }
}

impl From<LlmError> for EngineError {
    fn from(e: LlmError) -> Self {
        match e.kind {
            LlmErrorKind::Authentication => EngineError::Authentication(e.message),
            LlmErrorKind::RateLimit => EngineError::RateLimit(e.message),
            LlmErrorKind::InvalidRequest => EngineError::InvalidRequest(e.message),
            LlmErrorKind::ServerError => EngineError::ServerError(e.message),
            LlmErrorKind::Network => EngineError::Network(e.message),
            LlmErrorKind::Timeout => EngineError::Timeout { ms: 0 },
            LlmErrorKind::Unknown => EngineError::Internal(e.message),
        }
    }
}

/// A lazy, forward-only sequence of [`StreamEvent`]s. Not restartable —
/// consumed exactly once by the session task, which forwards each delta
/// to the transport outbound queue as it arrives.
pub type TokenStream = BoxStream<'static, StreamEvent>;

/// Common interface for all model bindings (tutor, evaluator, detector,
/// transcription). A binding is a value type: it owns its system prompt
/// and, by construction, cannot be aliased into a second logical role.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Immutable system prompt baked into this binding at construction.
    fn system_prompt(&self) -> &str;

    /// Non-streaming completion — used by the evaluator, the rabbithole
    /// detector, transcription, and the tutor's opening message.
    async fn complete(&self, messages: &[ChatMessage], cfg: &ChatConfig) -> Result<ChatResponse, LlmError>;

    /// Streaming completion — used only by the main-line tutor turn.
    async fn stream(&self, messages: &[ChatMessage], cfg: &ChatConfig) -> Result<TokenStream, LlmError>;
}

fn timeout_error(timeout: Duration) -> LlmError {
    LlmError::new(LlmErrorKind::Timeout, format!("request timed out after {}ms", timeout.as_millis()))
}

/// `client.complete` bounded by `timeout` (spec §6.2 `LlmConfig.timeout_seconds`).
/// A hung call surfaces as [`LlmErrorKind::Timeout`] instead of blocking forever.
pub async fn complete_with_timeout(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
    cfg: &ChatConfig,
    timeout: Duration,
) -> Result<ChatResponse, LlmError> {
    match tokio::time::timeout(timeout, client.complete(messages, cfg)).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(timeout)),
    }
}

/// `complete_with_timeout`, retried once if the first attempt fails with a
/// [`LlmError::is_retryable`] kind (spec §7: evaluator/detector/transcription
/// retry once on rate_limit/server_error/network/timeout, the tutor never does).
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
    cfg: &ChatConfig,
    timeout: Duration,
) -> Result<ChatResponse, LlmError> {
    match complete_with_timeout(client, messages, cfg, timeout).await {
        Err(e) if e.is_retryable() => complete_with_timeout(client, messages, cfg, timeout).await,
        other => other,
    }
}

/// `client.stream` bounded by `timeout`. Only the handshake (producing the
/// stream) is timed — once streaming starts, token deltas are forwarded as
/// they arrive with no further deadline.
pub async fn stream_with_timeout(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
    cfg: &ChatConfig,
    timeout: Duration,
) -> Result<TokenStream, LlmError> {
    match tokio::time::timeout(timeout, client.stream(messages, cfg)).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(timeout)),
    }
}
