//! Central shared state for the gateway binary, assembled once at startup
//! and handed to every connection task as an `Arc` — the same
//! one-struct-of-collaborators shape the teacher's `AppState` uses, sized
//! down to what the session engine actually needs (spec §6.1).

use std::sync::Arc;

use axum::{routing::get, Router};
use recall_core::config::RecallConfig;
use recall_core::testing::{
    InMemoryMessageRepository, InMemoryMetricsRepository, InMemoryOutcomeRepository,
    InMemoryRabbitholeRepository, InMemoryRecallPointRepository, InMemoryRecallSetRepository,
    InMemorySessionRepository,
};
use recall_core::{Clock, IdGenerator, SystemClock, UuidGenerator};
use recall_rabbithole::RabbitholeClientFactory;
use recall_session::SessionCollaborators;

use crate::llm_stub::EchoClientFactory;

/// Everything a new WS connection needs to start a session engine.
///
/// Persistence and the LLM provider's HTTP transport are out of scope for
/// this repository (see §1) — the repositories here are the in-memory
/// reference implementations that ship for testing, promoted to the
/// gateway's actual backing store, and `llm` is a deterministic stand-in
/// for a real provider binding. Swapping either out means implementing
/// the relevant trait and changing only this module.
pub struct AppState {
    pub config: RecallConfig,
    pub recall_sets: Arc<InMemoryRecallSetRepository>,
    pub recall_points: Arc<InMemoryRecallPointRepository>,
    pub sessions: Arc<InMemorySessionRepository>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub outcomes: Arc<InMemoryOutcomeRepository>,
    pub rabbitholes: Arc<InMemoryRabbitholeRepository>,
    pub metrics: Arc<InMemoryMetricsRepository>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub client_factory: Arc<dyn RabbitholeClientFactory>,
}

impl AppState {
    pub fn new(config: RecallConfig) -> Self {
        Self {
            config,
            recall_sets: Arc::new(InMemoryRecallSetRepository::default()),
            recall_points: Arc::new(InMemoryRecallPointRepository::default()),
            sessions: Arc::new(InMemorySessionRepository::default()),
            messages: Arc::new(InMemoryMessageRepository::default()),
            outcomes: Arc::new(InMemoryOutcomeRepository::default()),
            rabbitholes: Arc::new(InMemoryRabbitholeRepository::default()),
            metrics: Arc::new(InMemoryMetricsRepository::default()),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            client_factory: Arc::new(EchoClientFactory),
        }
    }

    /// Bundle the collaborators `recall_session::start` expects. Cloning is
    /// cheap — every field is an `Arc` — so each new connection gets its
    /// own bundle pointing at the same shared repositories.
    pub fn collaborators(&self) -> SessionCollaborators {
        SessionCollaborators {
            recall_sets: self.recall_sets.clone(),
            recall_points: self.recall_points.clone(),
            sessions: self.sessions.clone(),
            messages: self.messages.clone(),
            outcomes: self.outcomes.clone(),
            rabbitholes: self.rabbitholes.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
            client_factory: self.client_factory.clone(),
            config: self.config.clone(),
        }
    }
}

/// Assemble the full Axum router (spec §4.6: one WebSocket per session).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
