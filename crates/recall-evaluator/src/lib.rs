//! Recall Evaluator (spec §4.2, component C2).
//!
//! After every user turn, decides for each currently unchecked target
//! point whether the user's most recent turn demonstrated it. Advisory:
//! any failure (LLM error, malformed JSON) degrades to an empty
//! `Evaluation` and a logged warning — it never fails the session.

mod json;
mod prompt;

use std::time::Duration;

use recall_core::{complete_with_retry, ChatConfig, ChatMessage, LlmClient, Rating, RecallPointId};
use tracing::warn;

/// One checklist entry as seen by the evaluator — just enough to describe
/// the point in a prompt, not the full [`recall_core::RecallPoint`].
#[derive(Debug, Clone)]
pub struct ChecklistEntry {
    pub id: RecallPointId,
    pub content: String,
    pub context: String,
}

#[derive(Debug, Clone)]
pub struct EvaluateInput {
    /// Most recent messages, oldest first — caller truncates to the
    /// configured window (default 6, see `evaluator_recent_message_window`).
    pub recent_messages: Vec<ChatMessage>,
    pub unchecked_points: Vec<ChecklistEntry>,
    /// Points credited earlier in this same turn — suppressed so one
    /// demonstration can't double-credit across evaluator calls.
    pub just_recalled_point_ids: Vec<RecallPointId>,
    pub recall_set_context: String,
}

#[derive(Debug, Clone)]
pub struct Demonstration {
    pub point_id: RecallPointId,
    pub confidence: f64,
    pub rating: Rating,
    pub reasoning: String,
    pub message_index_start: u32,
    pub message_index_end: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub demonstrated: Vec<Demonstration>,
    pub overall_feedback: String,
}

#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub confidence_threshold: f64,
    pub model: String,
    pub max_tokens: u32,
    /// Bound on the underlying LLM call (spec §6.2 `LlmConfig.timeout_seconds`),
    /// retried once on a retryable failure (spec §7).
    pub request_timeout: Duration,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            model: "evaluator-default".to_string(),
            max_tokens: 1024,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Evaluate one turn against the current checklist.
///
/// Never returns an error: an LLM failure or malformed response degrades
/// to an empty `demonstrated` list, matching the error-handling design's
/// "advisory calls degrade silently" policy (spec §7).
pub async fn evaluate(
    client: &dyn LlmClient,
    input: &EvaluateInput,
    settings: &EvaluatorSettings,
) -> Evaluation {
    if input.unchecked_points.is_empty() {
        return Evaluation::default();
    }

    let prompt = prompt::build_evaluation_prompt(input);
    let cfg = ChatConfig::new(settings.model.clone(), settings.max_tokens, 0.2);
    let messages = vec![ChatMessage::user(prompt)];

    let response = match complete_with_retry(client, &messages, &cfg, settings.request_timeout).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "evaluator: llm call failed, treating turn as no demonstrations");
            return Evaluation::default();
        }
    };

    let parsed = match json::parse_lenient::<RawEvaluation>(&response.text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "evaluator: failed to parse model output as JSON");
            return Evaluation::default();
        }
    };

    let unchecked: std::collections::HashSet<&str> = input
        .unchecked_points
        .iter()
        .map(|p| p.id.as_str())
        .collect();

    let demonstrated = parsed
        .demonstrated
        .into_iter()
        .filter(|d| d.confidence >= settings.confidence_threshold)
        .filter(|d| unchecked.contains(d.point_id.as_str()))
        .filter(|d| !input.just_recalled_point_ids.iter().any(|id| id.as_str() == d.point_id))
        .map(|d| Demonstration {
            rating: Rating::from_confidence(d.confidence),
            point_id: RecallPointId::from(d.point_id),
            confidence: d.confidence,
            reasoning: d.reasoning,
            message_index_start: d.message_index_start,
            message_index_end: d.message_index_end,
        })
        .collect();

    Evaluation {
        demonstrated,
        overall_feedback: parsed.overall_feedback,
    }
}

#[derive(Debug, serde::Deserialize)]
struct RawDemonstration {
    point_id: String,
    confidence: f64,
    reasoning: String,
    message_index_start: u32,
    message_index_end: u32,
}

#[derive(Debug, serde::Deserialize, Default)]
struct RawEvaluation {
    #[serde(default)]
    demonstrated: Vec<RawDemonstration>,
    #[serde(default)]
    overall_feedback: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_core::{ChatResponse, LlmError, TokenStream, Usage};

    struct StubClient {
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        fn system_prompt(&self) -> &str {
            "stub evaluator"
        }

        async fn complete(&self, _messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                text: self.response.clone(),
                usage: Usage::default(),
                stop_reason: "end_turn".to_string(),
            })
        }

        async fn stream(&self, _messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<TokenStream, LlmError> {
            unimplemented!("evaluator never streams")
        }
    }

    fn checklist() -> Vec<ChecklistEntry> {
        vec![ChecklistEntry {
            id: RecallPointId::from("rp_1"),
            content: "ATP stores energy in phosphoanhydride bonds.".to_string(),
            context: "Cellular energy currency.".to_string(),
        }]
    }

    #[tokio::test]
    async fn accepts_demonstration_above_threshold() {
        let client = StubClient {
            response: r#"{"demonstrated":[{"point_id":"rp_1","confidence":0.72,"reasoning":"matches","message_index_start":1,"message_index_end":1}],"overall_feedback":"nice"}"#.to_string(),
        };
        let input = EvaluateInput {
            recent_messages: vec![ChatMessage::user("ATP holds energy in phosphate bonds")],
            unchecked_points: checklist(),
            just_recalled_point_ids: vec![],
            recall_set_context: "Biochemistry".to_string(),
        };
        let eval = evaluate(&client, &input, &EvaluatorSettings::default()).await;
        assert_eq!(eval.demonstrated.len(), 1);
        assert_eq!(eval.demonstrated[0].rating, Rating::Good);
    }

    #[tokio::test]
    async fn drops_demonstration_below_threshold() {
        let client = StubClient {
            response: r#"{"demonstrated":[{"point_id":"rp_1","confidence":0.3,"reasoning":"weak","message_index_start":1,"message_index_end":1}]}"#.to_string(),
        };
        let input = EvaluateInput {
            recent_messages: vec![],
            unchecked_points: checklist(),
            just_recalled_point_ids: vec![],
            recall_set_context: String::new(),
        };
        let eval = evaluate(&client, &input, &EvaluatorSettings::default()).await;
        assert!(eval.demonstrated.is_empty());
    }

    #[tokio::test]
    async fn drops_hallucinated_point_id() {
        let client = StubClient {
            response: r#"{"demonstrated":[{"point_id":"rp_does_not_exist","confidence":0.9,"reasoning":"?","message_index_start":1,"message_index_end":1}]}"#.to_string(),
        };
        let input = EvaluateInput {
            recent_messages: vec![],
            unchecked_points: checklist(),
            just_recalled_point_ids: vec![],
            recall_set_context: String::new(),
        };
        let eval = evaluate(&client, &input, &EvaluatorSettings::default()).await;
        assert!(eval.demonstrated.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_degrades_to_empty_evaluation() {
        let client = StubClient {
            response: "not json at all".to_string(),
        };
        let input = EvaluateInput {
            recent_messages: vec![],
            unchecked_points: checklist(),
            just_recalled_point_ids: vec![],
            recall_set_context: String::new(),
        };
        let eval = evaluate(&client, &input, &EvaluatorSettings::default()).await;
        assert!(eval.demonstrated.is_empty());
    }

    #[tokio::test]
    async fn suppresses_already_recalled_point() {
        let client = StubClient {
            response: r#"{"demonstrated":[{"point_id":"rp_1","confidence":0.9,"reasoning":"again","message_index_start":2,"message_index_end":2}]}"#.to_string(),
        };
        let input = EvaluateInput {
            recent_messages: vec![],
            unchecked_points: checklist(),
            just_recalled_point_ids: vec![RecallPointId::from("rp_1")],
            recall_set_context: String::new(),
        };
        let eval = evaluate(&client, &input, &EvaluatorSettings::default()).await;
        assert!(eval.demonstrated.is_empty());
    }
}
