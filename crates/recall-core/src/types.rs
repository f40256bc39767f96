use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use recall_fsrs::{FsrsState, Rating};

use crate::ids::{MessageId, OutcomeId, RabbitholeId, RecallPointId, RecallSetId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallSetStatus {
    Active,
    Paused,
    Archived,
}

/// A named collection of recall points studied together.
///
/// The core only ever reads active sets; lifecycle management (creation,
/// archival) happens in the owning application, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallSet {
    pub id: RecallSetId,
    pub name: String,
    pub description: String,
    pub status: RecallSetStatus,
    /// Template used to build the tutor's persona for sessions on this set.
    pub discussion_system_prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One prior attempt to recall a point, recorded for history/analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallAttempt {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: u64,
}

/// Minimum length, in characters, for `content` and `context`.
pub const MIN_POINT_TEXT_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum RecallPointValidationError {
    #[error("content must be at least {MIN_POINT_TEXT_LEN} characters")]
    ContentTooShort,
    #[error("context must be at least {MIN_POINT_TEXT_LEN} characters")]
    ContextTooShort,
}

/// An atomic fact, scheduled by FSRS.
///
/// Invariant: `content` and `context` are each at least
/// [`MIN_POINT_TEXT_LEN`] characters — enforced by [`RecallPoint::new`],
/// not re-checked on every field access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallPoint {
    pub id: RecallPointId,
    pub recall_set_id: RecallSetId,
    pub content: String,
    pub context: String,
    pub fsrs_state: FsrsState,
    pub recall_history: Vec<RecallAttempt>,
}

impl RecallPoint {
    pub fn new(
        id: RecallPointId,
        recall_set_id: RecallSetId,
        content: String,
        context: String,
        fsrs_state: FsrsState,
    ) -> Result<Self, RecallPointValidationError> {
        if content.len() < MIN_POINT_TEXT_LEN {
            return Err(RecallPointValidationError::ContentTooShort);
        }
        if context.len() < MIN_POINT_TEXT_LEN {
            return Err(RecallPointValidationError::ContextTooShort);
        }
        Ok(Self {
            id,
            recall_set_id,
            content,
            context,
            fsrs_state,
            recall_history: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

/// One live or concluded study session against one recall set.
///
/// Invariant: at most one `in_progress` session exists per recall set at
/// any time — enforced by the session repository, not by this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub recall_set_id: RecallSetId,
    pub status: SessionStatus,
    pub target_recall_point_ids: Vec<RecallPointId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One turn persisted into a session's dense, 0-indexed message sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: Option<u32>,
    pub message_index: u32,
}

/// A single demonstrated-and-ticked recall point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallOutcome {
    pub id: OutcomeId,
    pub session_id: SessionId,
    pub recall_point_id: RecallPointId,
    pub success: bool,
    pub confidence: f64,
    pub rating: Rating,
    pub reasoning: String,
    pub message_index_start: u32,
    pub message_index_end: u32,
    pub time_spent_ms: u64,
}

/// One turn inside a rabbithole's private conversation — deliberately a
/// separate shape from [`SessionMessage`] so it can never be mistaken for
/// (or accidentally merged into) the main transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A tangent conversation, isolated from the main transcript.
///
/// Invariant: either open (`return_message_index.is_none()`) or closed
/// with `trigger_message_index < return_message_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitholeEvent {
    pub id: RabbitholeId,
    pub session_id: SessionId,
    pub topic: String,
    pub depth: u32,
    pub trigger_message_index: u32,
    pub return_message_index: Option<u32>,
    pub conversation_history: Vec<ChatTurn>,
}

/// Metrics computed once, at session end. Derived, not canonical — never
/// mutated after a terminal transition persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: SessionId,
    pub duration_ms: u64,
    pub active_time_ms: u64,
    pub recall_rate: f64,
    pub engagement_score: f64,
    pub attempted_count: u32,
    pub successful_count: u32,
    pub failed_count: u32,
    pub rabbithole_count: u32,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_fsrs::{create_initial_state, FsrsParameters};

    #[test]
    fn recall_point_rejects_short_content() {
        let fsrs = create_initial_state(Utc::now(), &FsrsParameters::default());
        let err = RecallPoint::new(
            RecallPointId::from("rp_1"),
            RecallSetId::from("rs_1"),
            "too short".to_string(),
            "also too short context text here long enough".to_string(),
            fsrs,
        )
        .unwrap_err();
        assert!(matches!(err, RecallPointValidationError::ContentTooShort));
    }

    #[test]
    fn recall_point_accepts_valid_lengths() {
        let fsrs = create_initial_state(Utc::now(), &FsrsParameters::default());
        let point = RecallPoint::new(
            RecallPointId::from("rp_1"),
            RecallSetId::from("rs_1"),
            "ATP stores energy in phosphoanhydride bonds.".to_string(),
            "Explains the chemical basis of cellular energy currency.".to_string(),
            fsrs,
        )
        .unwrap();
        assert!(point.recall_history.is_empty());
    }
}
