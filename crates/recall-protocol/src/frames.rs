//! Wire frames exchanged between a transport client and the session engine
//! (spec §4.6). Each direction is one tagged enum — the `type` field
//! selects the variant, matching the teacher's tagged-envelope convention
//! (`{"type": "req", ...}`) but specialized per-message instead of routed
//! through a generic method/params pair, since this protocol has a fixed,
//! small frame set rather than an open RPC surface.

use serde::{Deserialize, Serialize};

/// Client → Server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame sent on a new connection.
    Hello {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_from_index: Option<u32>,
    },
    UserMessage {
        text: String,
        source_kind: SourceKind,
    },
    LeaveSession,
    Abandon,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Voice,
    Typed,
}

/// A single terminology/notation correction applied by the transcription
/// pipeline, surfaced to the client for optional display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
}

/// Server → Client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    SessionStarted {
        total_points: u32,
        recalled_count: u32,
        opening_message_index: u32,
    },
    UserMessageAccepted {
        message_index: u32,
        display_text: String,
        #[serde(default)]
        corrections: Vec<Correction>,
    },
    AssistantToken {
        delta: String,
    },
    AssistantComplete {
        message_index: u32,
    },
    PointRecalled {
        point_id: String,
        recalled_count: u32,
        total_points: u32,
    },
    RabbitholeEntered {
        topic: String,
        depth: u32,
        trigger_message_index: u32,
    },
    RabbitholeReturned {
        topic: String,
        return_message_index: u32,
    },
    AllPointsRecalled {
        recalled_count: u32,
        total_points: u32,
    },
    SessionCompleted {
        metrics_summary: MetricsSummary,
    },
    SessionPaused,
    SessionAbandoned,
    Error {
        code: String,
        message: String,
    },
    Busy,
}

/// Client-facing projection of [`recall_core::SessionMetrics`] — mirrors it
/// field-for-field today; kept as a distinct type so the wire shape can
/// diverge from the internal one without touching the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
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

impl From<recall_core::SessionMetrics> for MetricsSummary {
    fn from(m: recall_core::SessionMetrics) -> Self {
        Self {
            duration_ms: m.duration_ms,
            active_time_ms: m.active_time_ms,
            recall_rate: m.recall_rate,
            engagement_score: m.engagement_score,
            attempted_count: m.attempted_count,
            successful_count: m.successful_count,
            failed_count: m.failed_count,
            rabbithole_count: m.rabbithole_count,
            cost_usd: m.cost_usd,
        }
    }
}
