use thiserror::Error;

/// Errors that can surface from the core engine to a transport client.
///
/// Every variant maps to exactly one wire error code via [`EngineError::code`],
/// matching the taxonomy in the error-handling design: load-bearing calls
/// (session start, the tutor stream) surface their error; advisory calls
/// (evaluator, rabbithole detector, transcription) never construct one of
/// these — they log and fall back to an empty/unchanged result instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("recall set not found: {id}")]
    NotFound { id: String },

    #[error("recall set {id} is not active (status: {status})")]
    Conflict { id: String, status: String },

    #[error("recall set {id} has no due points")]
    NoDuePoints { id: String },

    #[error("a session is already in progress for recall set {id}")]
    SessionAlreadyInProgress { id: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider server error: {0}")]
    ServerError(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("failed to parse model output: {0}")]
    Parse(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("turn already in progress for this session")]
    Busy,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short wire code sent to clients in `error{code, message}` frames.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NoDuePoints { .. } => "no_due_points",
            EngineError::SessionAlreadyInProgress { .. } => "conflict",
            EngineError::Authentication(_) => "authentication",
            EngineError::RateLimit(_) => "rate_limit",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::ServerError(_) => "server_error",
            EngineError::Network(_) => "network",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Parse(_) => "parse",
            EngineError::Repository(_) => "internal",
            EngineError::Busy => "busy",
            EngineError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
