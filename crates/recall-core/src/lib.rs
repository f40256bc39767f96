//! `recall-core` — shared domain types, collaborator ports, and error/config
//! plumbing consumed by every other crate in the tutoring engine.
//!
//! This crate defines interfaces, not implementations: the concrete LLM
//! provider, database, and transport all live outside it (or, for tests,
//! in [`testing`]).

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod llm;
pub mod repo;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{GatewayConfig, LlmConfig, RecallConfig, SessionConfig};
pub use error::{EngineError, Result};
pub use ids::{
    IdGenerator, MessageId, OutcomeId, RabbitholeId, RecallPointId, RecallSetId, SessionId,
    UuidGenerator,
};
pub use llm::{
    complete_with_retry, complete_with_timeout, stream_with_timeout, ChatConfig, ChatMessage,
    ChatResponse, LlmClient, LlmError, LlmErrorKind, Role, StreamEvent, TokenStream, Usage,
};
pub use repo::{
    blocks_new_session, AggregateStats, MessageRepository, MetricsRepository, OutcomeRepository,
    RabbitholeRepository, RecallPointRepository, RecallSetRepository, SessionRepository,
};
pub use types::{
    ChatTurn, MessageRole, RabbitholeEvent, RecallAttempt, RecallOutcome, RecallPoint,
    RecallPointValidationError, RecallSet, RecallSetStatus, Session, SessionMessage,
    SessionMetrics, SessionStatus, MIN_POINT_TEXT_LEN,
};

pub use recall_fsrs::{CardState, FsrsParameters, FsrsState, Rating};
