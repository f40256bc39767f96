//! Narrow per-entity repository interfaces consumed by the session engine
//! (spec §6.1). Each capability is a separate trait so a caller only
//! depends on the operations it actually uses — the engine never takes a
//! single fat "repository" god-object.
//!
//! Writes are atomic per entity; the session task is the only writer for
//! any given session's rows, so these traits need not serialize writes
//! themselves, only be safe to call concurrently across sessions.

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{MessageId, OutcomeId, RabbitholeId, RecallPointId, RecallSetId, SessionId};
use crate::types::{
    RabbitholeEvent, RecallOutcome, RecallPoint, RecallSet, Session, SessionMessage,
    SessionMetrics, SessionStatus,
};

#[async_trait]
pub trait RecallSetRepository: Send + Sync {
    async fn find_by_id(&self, id: &RecallSetId) -> Result<Option<RecallSet>>;
    /// Case-insensitive lookup.
    async fn find_by_name(&self, name: &str) -> Result<Option<RecallSet>>;
    async fn create(&self, set: RecallSet) -> Result<RecallSet>;
    async fn update(&self, set: RecallSet) -> Result<RecallSet>;
    async fn delete(&self, id: &RecallSetId) -> Result<()>;
}

#[async_trait]
pub trait RecallPointRepository: Send + Sync {
    async fn find_by_id(&self, id: &RecallPointId) -> Result<Option<RecallPoint>>;
    async fn find_by_recall_set_id(&self, set_id: &RecallSetId) -> Result<Vec<RecallPoint>>;
    /// Points in `set_id` whose `fsrs_state.due` has passed, ordered by due date.
    async fn find_due(&self, set_id: &RecallSetId, limit: u32) -> Result<Vec<RecallPoint>>;
    async fn create(&self, point: RecallPoint) -> Result<RecallPoint>;
    /// Persists the full point, including a fresh `fsrs_state` after a review.
    async fn update(&self, point: RecallPoint) -> Result<RecallPoint>;
    async fn delete(&self, id: &RecallPointId) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>>;
    async fn find_by_recall_set_id(&self, set_id: &RecallSetId) -> Result<Vec<Session>>;
    /// The at-most-one `in_progress` session for this set, if any (invariant 6).
    async fn find_in_progress(&self, set_id: &RecallSetId) -> Result<Option<Session>>;
    async fn create(&self, session: Session) -> Result<Session>;
    async fn update(&self, session: Session) -> Result<Session>;
    async fn delete(&self, id: &SessionId) -> Result<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<SessionMessage>>;
    /// All messages for a session, ordered by `message_index`.
    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Vec<SessionMessage>>;
    async fn create(&self, message: SessionMessage) -> Result<SessionMessage>;
}

#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn find_by_id(&self, id: &OutcomeId) -> Result<Option<RecallOutcome>>;
    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Vec<RecallOutcome>>;
    async fn create(&self, outcome: RecallOutcome) -> Result<RecallOutcome>;
}

#[async_trait]
pub trait RabbitholeRepository: Send + Sync {
    async fn find_by_id(&self, id: &RabbitholeId) -> Result<Option<RabbitholeEvent>>;
    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Vec<RabbitholeEvent>>;
    async fn create(&self, event: RabbitholeEvent) -> Result<RabbitholeEvent>;
    async fn update(&self, event: RabbitholeEvent) -> Result<RabbitholeEvent>;
}

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Option<SessionMetrics>>;
    async fn create(&self, metrics: SessionMetrics) -> Result<SessionMetrics>;
    /// Aggregate stats across every completed session for a recall set —
    /// used by reporting surfaces outside the engine, not by the turn loop.
    async fn get_aggregate_stats(&self, set_id: &RecallSetId) -> Result<AggregateStats>;
}

/// Rollup used by `GetAggregateStats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateStats {
    pub session_count: u32,
    pub average_recall_rate: f64,
    pub average_engagement_score: f64,
}

/// Whether `status` would permit starting a new session against a recall
/// set carrying it — a helper shared by the `SessionAlreadyInProgress`/
/// `Conflict` checks at session start.
pub fn blocks_new_session(status: SessionStatus) -> bool {
    matches!(status, SessionStatus::InProgress)
}
