//! Bundles every injected dependency the engine needs (spec §6.1),
//! grouped the way the teacher groups collaborators into one constructor
//! argument instead of reaching for ambient globals.

use std::sync::Arc;

use recall_core::{
    Clock, IdGenerator, MessageRepository, MetricsRepository, OutcomeRepository,
    RabbitholeRepository, RecallConfig, RecallPointRepository, RecallSetRepository,
    SessionRepository,
};
use recall_rabbithole::RabbitholeClientFactory;

/// Every port the session engine depends on. One instance is shared across
/// all live sessions; the engine only ever borrows from it.
pub struct SessionCollaborators {
    pub recall_sets: Arc<dyn RecallSetRepository>,
    pub recall_points: Arc<dyn RecallPointRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub outcomes: Arc<dyn OutcomeRepository>,
    pub rabbitholes: Arc<dyn RabbitholeRepository>,
    pub metrics: Arc<dyn MetricsRepository>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    /// Mints a fresh, distinct `LlmClient` for every role (tutor, evaluator,
    /// detector, transcription, each rabbithole agent) — reused across all
    /// of them since the shape is identical: a system prompt in, a boxed
    /// client out, never shared.
    pub client_factory: Arc<dyn RabbitholeClientFactory>,
    pub config: RecallConfig,
}
