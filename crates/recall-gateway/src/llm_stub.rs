//! A deterministic, dependency-free `LlmClient` binding.
//!
//! The real provider's HTTP transport is out of scope for this repository
//! (see §1) — nothing here calls out to a network. It exists so the
//! gateway binary has *something* concrete to hand `SessionCollaborators`,
//! the same way the in-memory repositories in [`recall_core::testing`]
//! stand in for persistence. Swap this module out for a real provider
//! client without touching anything upstream of `AppState`.

use async_trait::async_trait;
use futures_util::stream;
use recall_core::{
    ChatConfig, ChatMessage, ChatResponse, LlmClient, LlmError, StreamEvent, TokenStream, Usage,
};
use recall_rabbithole::RabbitholeClientFactory;

/// Echoes back a canned continuation built from the last user turn. Good
/// enough to drive the session engine end to end without a real model.
pub struct EchoLlmClient {
    system_prompt: String,
}

impl EchoLlmClient {
    pub fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    fn reply_to(&self, messages: &[ChatMessage]) -> String {
        match messages.last() {
            Some(last) => format!("I heard: \"{}\". Tell me more.", last.content),
            None => "Let's get started.".to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for EchoLlmClient {
    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    async fn complete(&self, messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            text: self.reply_to(messages),
            usage: Usage::default(),
            stop_reason: "end_turn".to_string(),
        })
    }

    async fn stream(&self, messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<TokenStream, LlmError> {
        let text = self.reply_to(messages);
        let words: Vec<StreamEvent> = text
            .split_inclusive(' ')
            .map(|w| StreamEvent::TextDelta { text: w.to_string() })
            .chain(std::iter::once(StreamEvent::Done {
                usage: Usage::default(),
                stop_reason: "end_turn".to_string(),
            }))
            .collect();
        Ok(Box::pin(stream::iter(words)))
    }
}

/// Mints an [`EchoLlmClient`] for every role the engine asks for — tutor,
/// evaluator, detector, transcription, each rabbithole agent all share the
/// same stand-in, distinguished only by the system prompt they're built
/// with.
pub struct EchoClientFactory;

impl RabbitholeClientFactory for EchoClientFactory {
    fn build(&self, system_prompt: String) -> Box<dyn LlmClient> {
        Box::new(EchoLlmClient::new(system_prompt))
    }
}
