use recall_core::{complete_with_retry, ChatConfig, ChatMessage, LlmClient};
use tracing::warn;

use crate::config::TranscriptionConfig;
use crate::notation::has_notation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Voice,
    Typed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
}

#[derive(Debug, Clone)]
pub struct ProcessedText {
    pub display_text: String,
    pub llm_text: String,
    pub corrections: Vec<Correction>,
    pub has_notation: bool,
}

impl ProcessedText {
    fn unchanged(raw_text: &str) -> Self {
        Self {
            display_text: raw_text.to_string(),
            llm_text: raw_text.to_string(),
            corrections: Vec::new(),
            has_notation: has_notation(raw_text),
        }
    }
}

#[derive(Debug, serde::Deserialize, Default)]
struct RawProcessed {
    #[serde(default)]
    display_text: Option<String>,
    #[serde(default)]
    llm_text: Option<String>,
    #[serde(default)]
    corrections: Vec<RawCorrection>,
}

#[derive(Debug, serde::Deserialize)]
struct RawCorrection {
    original: String,
    corrected: String,
}

/// Turn raw transport text into display-ready and LLM-context text
/// (spec §4.4). Never fails the turn: a parse failure degrades to the raw
/// text unchanged.
pub async fn process(
    client: &dyn LlmClient,
    raw_text: &str,
    source: SourceKind,
    skip_terminology_correction: bool,
    config: &TranscriptionConfig,
    model: &str,
) -> ProcessedText {
    if raw_text.trim().is_empty() {
        return ProcessedText {
            display_text: String::new(),
            llm_text: String::new(),
            corrections: Vec::new(),
            has_notation: false,
        };
    }

    let notation_only = source == SourceKind::Typed || skip_terminology_correction;

    if notation_only && !config.enable_notation_detection {
        return ProcessedText::unchanged(raw_text);
    }

    let prompt = if notation_only {
        notation_only_prompt(raw_text)
    } else {
        combined_prompt(raw_text, &config.recall_set_terminology)
    };

    let cfg = ChatConfig::new(model.to_string(), 1024, 0.0);
    let messages = vec![ChatMessage::user(prompt)];

    let response = match complete_with_retry(client, &messages, &cfg, config.request_timeout).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "transcription: llm call failed, returning raw text unchanged");
            return ProcessedText::unchanged(raw_text);
        }
    };

    let parsed = match crate::json::parse_lenient::<RawProcessed>(&response.text) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "transcription: failed to parse model output, returning raw text unchanged");
            return ProcessedText::unchanged(raw_text);
        }
    };

    let display_text = parsed.display_text.unwrap_or_else(|| raw_text.to_string());
    let llm_text = parsed.llm_text.unwrap_or_else(|| display_text.clone());
    let corrections = parsed
        .corrections
        .into_iter()
        .map(|c| Correction { original: c.original, corrected: c.corrected })
        .collect();

    ProcessedText {
        has_notation: has_notation(&display_text),
        display_text,
        llm_text,
        corrections,
    }
}

fn notation_only_prompt(raw_text: &str) -> String {
    format!(
        "Reformat this transcribed text, marking any mathematical or code notation with \
        LaTeX `$...$` or backticks, leaving everything else untouched. Return strict JSON: \
        {{\"display_text\": string, \"llm_text\": string, \"corrections\": []}}.\n\nText: {raw_text}"
    )
}

fn combined_prompt(raw_text: &str, terminology: &[String]) -> String {
    format!(
        "This text was transcribed from speech and may contain misheard domain \
        terminology. Known terms for this topic: {}.\n\
        Correct misheard terminology and mark any mathematical or code notation with \
        LaTeX `$...$` or backticks. Return strict JSON: {{\"display_text\": string, \
        \"llm_text\": string, \"corrections\": [{{\"original\": string, \"corrected\": string}}]}}.\n\n\
        Text: {raw_text}",
        terminology.join(", ")
    )
}
