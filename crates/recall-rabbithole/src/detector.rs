//! Rabbithole detector (spec §4.3, component C3). A cheap, low-latency LLM
//! call deciding whether a tangent has started, and — while one is open —
//! whether the user wants back to the main line.

use std::time::Duration;

use recall_core::{complete_with_retry, ChatConfig, ChatMessage, LlmClient};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EnterDecision {
    pub enter: bool,
    pub topic: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ReturnDecision {
    pub return_to_main: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub enter_threshold: f64,
    pub return_threshold: f64,
    pub model: String,
    /// Bound on the underlying LLM call (spec §6.2 `LlmConfig.timeout_seconds`),
    /// retried once on a retryable failure (spec §7).
    pub request_timeout: Duration,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            enter_threshold: 0.7,
            return_threshold: 0.6,
            model: "detector-cheap".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, serde::Deserialize, Default)]
struct RawEnter {
    #[serde(default)]
    enter: bool,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, serde::Deserialize, Default)]
struct RawReturn {
    #[serde(default)]
    return_to_main: bool,
    #[serde(default)]
    confidence: f64,
}

/// Decide whether the last user turn opens a tangent. Swallows LLM/parse
/// failures as "does not enter" — advisory call, never fails the turn.
pub async fn detect_enter(
    client: &dyn LlmClient,
    last_user_turn: &str,
    conversation_tail: &[ChatMessage],
    settings: &DetectorSettings,
) -> EnterDecision {
    let prompt = format!(
        "Conversation tail:\n{}\n\nLatest user turn: {}\n\n\
        Does this turn open a tangent away from the current recall topic? \
        Return strict JSON: {{\"enter\": bool, \"topic\": string|null, \"confidence\": number 0..1}}.",
        render_tail(conversation_tail),
        last_user_turn
    );
    let cfg = ChatConfig::new(settings.model.clone(), 256, 0.0);
    let messages = vec![ChatMessage::user(prompt)];

    let raw = match complete_with_retry(client, &messages, &cfg, settings.request_timeout).await {
        Ok(r) => crate::json::parse_lenient::<RawEnter>(&r.text).unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "rabbithole detector: llm call failed");
            RawEnter::default()
        }
    };

    let enter = raw.enter && raw.confidence >= settings.enter_threshold;
    EnterDecision {
        enter,
        topic: if enter { raw.topic } else { None },
        confidence: raw.confidence,
    }
}

/// Decide whether the user wants to leave an open tangent.
pub async fn detect_return(
    client: &dyn LlmClient,
    conversation_tail: &[ChatMessage],
    settings: &DetectorSettings,
) -> ReturnDecision {
    let prompt = format!(
        "Tangent conversation tail:\n{}\n\n\
        Does the user want to return to the main recall session now? \
        Return strict JSON: {{\"return_to_main\": bool, \"confidence\": number 0..1}}.",
        render_tail(conversation_tail)
    );
    let cfg = ChatConfig::new(settings.model.clone(), 128, 0.0);
    let messages = vec![ChatMessage::user(prompt)];

    let raw = match complete_with_retry(client, &messages, &cfg, settings.request_timeout).await {
        Ok(r) => crate::json::parse_lenient::<RawReturn>(&r.text).unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "rabbithole detector: llm call failed");
            RawReturn::default()
        }
    };

    ReturnDecision {
        return_to_main: raw.return_to_main && raw.confidence >= settings.return_threshold,
        confidence: raw.confidence,
    }
}

fn render_tail(tail: &[ChatMessage]) -> String {
    tail.iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_core::{ChatResponse, TokenStream, Usage};

    struct StubClient {
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        fn system_prompt(&self) -> &str {
            "stub detector"
        }

        async fn complete(&self, _messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<ChatResponse, recall_core::LlmError> {
            Ok(ChatResponse {
                text: self.response.clone(),
                usage: Usage::default(),
                stop_reason: "end_turn".to_string(),
            })
        }

        async fn stream(&self, _messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<TokenStream, recall_core::LlmError> {
            unimplemented!("detector never streams")
        }
    }

    #[tokio::test]
    async fn enters_above_threshold_with_topic() {
        let client = StubClient {
            response: r#"{"enter":true,"topic":"ATP synthase","confidence":0.82}"#.to_string(),
        };
        let decision = detect_enter(&client, "wait how does ATP synthase even work", &[], &DetectorSettings::default()).await;
        assert!(decision.enter);
        assert_eq!(decision.topic.as_deref(), Some("ATP synthase"));
    }

    #[tokio::test]
    async fn does_not_enter_below_threshold() {
        let client = StubClient {
            response: r#"{"enter":true,"topic":"ATP synthase","confidence":0.4}"#.to_string(),
        };
        let decision = detect_enter(&client, "ok continuing", &[], &DetectorSettings::default()).await;
        assert!(!decision.enter);
        assert!(decision.topic.is_none());
    }

    #[tokio::test]
    async fn returns_to_main_above_threshold() {
        let client = StubClient {
            response: r#"{"return_to_main":true,"confidence":0.75}"#.to_string(),
        };
        let decision = detect_return(&client, &[], &DetectorSettings::default()).await;
        assert!(decision.return_to_main);
    }

    #[tokio::test]
    async fn malformed_json_does_not_enter() {
        let client = StubClient { response: "garbage".to_string() };
        let decision = detect_enter(&client, "anything", &[], &DetectorSettings::default()).await;
        assert!(!decision.enter);
    }
}
