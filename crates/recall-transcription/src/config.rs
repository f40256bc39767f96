use std::time::Duration;

use recall_core::{complete_with_retry, ChatConfig, ChatMessage, LlmClient};
use tracing::warn;

/// Computed once per session at start (spec §4.4).
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub recall_set_terminology: Vec<String>,
    pub enable_notation_detection: bool,
    /// Bound on each underlying LLM call (spec §6.2 `LlmConfig.timeout_seconds`),
    /// retried once on a retryable failure (spec §7).
    pub request_timeout: Duration,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            recall_set_terminology: Vec::new(),
            enable_notation_detection: false,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, serde::Deserialize, Default)]
struct RawTerminology {
    #[serde(default)]
    terms: Vec<String>,
}

/// Ask the LLM to enumerate technical vocabulary across every point's
/// `content`/`context` in a recall set. Swallows failures to an empty
/// list — the pipeline still works without a terminology hint, just with
/// fewer corrections.
pub async fn extract_terminology(
    client: &dyn LlmClient,
    point_texts: &[(String, String)],
    model: &str,
    request_timeout: Duration,
) -> Vec<String> {
    if point_texts.is_empty() {
        return Vec::new();
    }

    let mut body = String::new();
    for (content, context) in point_texts {
        body.push_str(&format!("- {content}\n  {context}\n"));
    }

    let prompt = format!(
        "List the technical/domain vocabulary terms used across these facts, one-word \
        or short-phrase terms only, as strict JSON: {{\"terms\": [string, ...]}}.\n\n{body}"
    );
    let cfg = ChatConfig::new(model.to_string(), 512, 0.0);
    let messages = vec![ChatMessage::user(prompt)];

    match complete_with_retry(client, &messages, &cfg, request_timeout).await {
        Ok(r) => crate::json::parse_lenient::<RawTerminology>(&r.text)
            .map(|t| t.terms)
            .unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "transcription: terminology extraction failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_core::{ChatResponse, LlmError, TokenStream, Usage};

    struct StubClient(String);

    #[async_trait]
    impl LlmClient for StubClient {
        fn system_prompt(&self) -> &str {
            "stub"
        }
        async fn complete(&self, _m: &[ChatMessage], _c: &ChatConfig) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse { text: self.0.clone(), usage: Usage::default(), stop_reason: "end_turn".into() })
        }
        async fn stream(&self, _m: &[ChatMessage], _c: &ChatConfig) -> Result<TokenStream, LlmError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn extracts_terms_from_strict_json() {
        let client = StubClient(r#"{"terms":["ATP","phosphoanhydride bond"]}"#.to_string());
        let terms = extract_terminology(
            &client,
            &[("ATP stores energy".into(), "context".into())],
            "cheap-model",
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(terms, vec!["ATP".to_string(), "phosphoanhydride bond".to_string()]);
    }

    #[tokio::test]
    async fn empty_points_short_circuit_without_a_call() {
        let client = StubClient("should not be parsed".to_string());
        let terms = extract_terminology(&client, &[], "cheap-model", Duration::from_secs(60)).await;
        assert!(terms.is_empty());
    }
}
