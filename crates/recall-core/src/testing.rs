//! In-memory reference implementations of every repository port, used by
//! this crate's own tests and by every downstream crate's test suites.
//! Never compiled into a production binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::ids::{MessageId, OutcomeId, RabbitholeId, RecallPointId, RecallSetId, SessionId};
use crate::repo::{
    blocks_new_session, AggregateStats, MessageRepository, MetricsRepository, OutcomeRepository,
    RabbitholeRepository, RecallPointRepository, RecallSetRepository, SessionRepository,
};
use crate::types::{
    RabbitholeEvent, RecallOutcome, RecallPoint, RecallSet, Session, SessionMessage,
    SessionMetrics, SessionStatus,
};

/// Shared in-memory table keyed by a `String` id.
#[derive(Default)]
struct Table<T>(Mutex<HashMap<String, T>>);

impl<T: Clone> Table<T> {
    fn get(&self, id: &str) -> Option<T> {
        self.0.lock().expect("table poisoned").get(id).cloned()
    }

    fn put(&self, id: String, value: T) {
        self.0.lock().expect("table poisoned").insert(id, value);
    }

    fn remove(&self, id: &str) {
        self.0.lock().expect("table poisoned").remove(id);
    }

    fn values(&self) -> Vec<T> {
        self.0.lock().expect("table poisoned").values().cloned().collect()
    }
}

#[derive(Default)]
pub struct InMemoryRecallSetRepository {
    sets: Table<RecallSet>,
}

#[async_trait]
impl RecallSetRepository for InMemoryRecallSetRepository {
    async fn find_by_id(&self, id: &RecallSetId) -> Result<Option<RecallSet>> {
        Ok(self.sets.get(id.as_str()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RecallSet>> {
        let needle = name.to_lowercase();
        Ok(self
            .sets
            .values()
            .into_iter()
            .find(|s| s.name.to_lowercase() == needle))
    }

    async fn create(&self, set: RecallSet) -> Result<RecallSet> {
        self.sets.put(set.id.as_str().to_string(), set.clone());
        Ok(set)
    }

    async fn update(&self, set: RecallSet) -> Result<RecallSet> {
        if self.sets.get(set.id.as_str()).is_none() {
            return Err(EngineError::NotFound { id: set.id.to_string() });
        }
        self.sets.put(set.id.as_str().to_string(), set.clone());
        Ok(set)
    }

    async fn delete(&self, id: &RecallSetId) -> Result<()> {
        self.sets.remove(id.as_str());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecallPointRepository {
    points: Table<RecallPoint>,
}

#[async_trait]
impl RecallPointRepository for InMemoryRecallPointRepository {
    async fn find_by_id(&self, id: &RecallPointId) -> Result<Option<RecallPoint>> {
        Ok(self.points.get(id.as_str()))
    }

    async fn find_by_recall_set_id(&self, set_id: &RecallSetId) -> Result<Vec<RecallPoint>> {
        Ok(self
            .points
            .values()
            .into_iter()
            .filter(|p| &p.recall_set_id == set_id)
            .collect())
    }

    async fn find_due(&self, set_id: &RecallSetId, limit: u32) -> Result<Vec<RecallPoint>> {
        let now = chrono::Utc::now();
        let mut due: Vec<RecallPoint> = self
            .points
            .values()
            .into_iter()
            .filter(|p| &p.recall_set_id == set_id && p.fsrs_state.due <= now)
            .collect();
        due.sort_by_key(|p| p.fsrs_state.due);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn create(&self, point: RecallPoint) -> Result<RecallPoint> {
        self.points.put(point.id.as_str().to_string(), point.clone());
        Ok(point)
    }

    async fn update(&self, point: RecallPoint) -> Result<RecallPoint> {
        self.points.put(point.id.as_str().to_string(), point.clone());
        Ok(point)
    }

    async fn delete(&self, id: &RecallPointId) -> Result<()> {
        self.points.remove(id.as_str());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Table<Session>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.get(id.as_str()))
    }

    async fn find_by_recall_set_id(&self, set_id: &RecallSetId) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .values()
            .into_iter()
            .filter(|s| &s.recall_set_id == set_id)
            .collect())
    }

    async fn find_in_progress(&self, set_id: &RecallSetId) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .values()
            .into_iter()
            .find(|s| &s.recall_set_id == set_id && blocks_new_session(s.status)))
    }

    async fn create(&self, session: Session) -> Result<Session> {
        self.sessions.put(session.id.as_str().to_string(), session.clone());
        Ok(session)
    }

    async fn update(&self, session: Session) -> Result<Session> {
        self.sessions.put(session.id.as_str().to_string(), session.clone());
        Ok(session)
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        self.sessions.remove(id.as_str());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Table<SessionMessage>,
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<SessionMessage>> {
        Ok(self.messages.get(id.as_str()))
    }

    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Vec<SessionMessage>> {
        let mut msgs: Vec<SessionMessage> = self
            .messages
            .values()
            .into_iter()
            .filter(|m| &m.session_id == session_id)
            .collect();
        msgs.sort_by_key(|m| m.message_index);
        Ok(msgs)
    }

    async fn create(&self, message: SessionMessage) -> Result<SessionMessage> {
        self.messages.put(message.id.as_str().to_string(), message.clone());
        Ok(message)
    }
}

#[derive(Default)]
pub struct InMemoryOutcomeRepository {
    outcomes: Table<RecallOutcome>,
}

#[async_trait]
impl OutcomeRepository for InMemoryOutcomeRepository {
    async fn find_by_id(&self, id: &OutcomeId) -> Result<Option<RecallOutcome>> {
        Ok(self.outcomes.get(id.as_str()))
    }

    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Vec<RecallOutcome>> {
        Ok(self
            .outcomes
            .values()
            .into_iter()
            .filter(|o| &o.session_id == session_id)
            .collect())
    }

    async fn create(&self, outcome: RecallOutcome) -> Result<RecallOutcome> {
        self.outcomes.put(outcome.id.as_str().to_string(), outcome.clone());
        Ok(outcome)
    }
}

#[derive(Default)]
pub struct InMemoryRabbitholeRepository {
    events: Table<RabbitholeEvent>,
}

#[async_trait]
impl RabbitholeRepository for InMemoryRabbitholeRepository {
    async fn find_by_id(&self, id: &RabbitholeId) -> Result<Option<RabbitholeEvent>> {
        Ok(self.events.get(id.as_str()))
    }

    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Vec<RabbitholeEvent>> {
        Ok(self
            .events
            .values()
            .into_iter()
            .filter(|e| &e.session_id == session_id)
            .collect())
    }

    async fn create(&self, event: RabbitholeEvent) -> Result<RabbitholeEvent> {
        self.events.put(event.id.as_str().to_string(), event.clone());
        Ok(event)
    }

    async fn update(&self, event: RabbitholeEvent) -> Result<RabbitholeEvent> {
        self.events.put(event.id.as_str().to_string(), event.clone());
        Ok(event)
    }
}

#[derive(Default)]
pub struct InMemoryMetricsRepository {
    metrics: Table<SessionMetrics>,
}

#[async_trait]
impl MetricsRepository for InMemoryMetricsRepository {
    async fn find_by_session_id(&self, session_id: &SessionId) -> Result<Option<SessionMetrics>> {
        Ok(self.metrics.get(session_id.as_str()))
    }

    async fn create(&self, metrics: SessionMetrics) -> Result<SessionMetrics> {
        self.metrics
            .put(metrics.session_id.as_str().to_string(), metrics.clone());
        Ok(metrics)
    }

    async fn get_aggregate_stats(&self, set_id: &RecallSetId) -> Result<AggregateStats> {
        // This in-memory repository doesn't track which set a session
        // belongs to on its own; callers in tests filter sessions first
        // and call `create` only for sessions under `set_id`.
        let _ = set_id;
        let all = self.metrics.values();
        if all.is_empty() {
            return Ok(AggregateStats::default());
        }
        let n = all.len() as f64;
        let average_recall_rate = all.iter().map(|m| m.recall_rate).sum::<f64>() / n;
        let average_engagement_score = all.iter().map(|m| m.engagement_score).sum::<f64>() / n;
        Ok(AggregateStats {
            session_count: all.len() as u32,
            average_recall_rate,
            average_engagement_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdGenerator;
    use crate::types::RecallSetStatus;
    use crate::UuidGenerator;
    use chrono::Utc;

    #[tokio::test]
    async fn recall_set_repository_roundtrips() {
        let repo = InMemoryRecallSetRepository::default();
        let gen = UuidGenerator;
        let set = RecallSet {
            id: RecallSetId::from(gen.new_id(RecallSetId::PREFIX)),
            name: "Biochemistry".to_string(),
            description: "Core metabolic pathways".to_string(),
            status: RecallSetStatus::Active,
            discussion_system_prompt: "You are a patient tutor.".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.create(set.clone()).await.unwrap();

        let found = repo.find_by_id(&set.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Biochemistry");

        let found_ci = repo.find_by_name("biochemistry").await.unwrap().unwrap();
        assert_eq!(found_ci.id, set.id);
    }

    #[tokio::test]
    async fn session_repository_finds_at_most_one_in_progress() {
        let repo = InMemorySessionRepository::default();
        let gen = UuidGenerator;
        let set_id = RecallSetId::from(gen.new_id(RecallSetId::PREFIX));
        let session = Session {
            id: SessionId::from(gen.new_id(SessionId::PREFIX)),
            recall_set_id: set_id.clone(),
            status: SessionStatus::InProgress,
            target_recall_point_ids: vec![],
            started_at: Utc::now(),
            ended_at: None,
        };
        repo.create(session.clone()).await.unwrap();

        let found = repo.find_in_progress(&set_id).await.unwrap();
        assert_eq!(found.unwrap().id, session.id);
    }
}
