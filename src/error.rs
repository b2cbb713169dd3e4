//! Error taxonomy shared by the indexing and query sides.

use thiserror::Error;

/// Errors surfaced by the service to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Bad caller input (empty query, malformed config path)
    #[error("validation error: {0}")]
    Validation(String),

    /// A start was requested while a run is active
    #[error("indexing already in progress")]
    AlreadyRunning,

    /// A read was attempted while a run is active
    #[error("indexing in progress, try again later")]
    Locked,

    #[error("document not found: {0}")]
    NotFound(String),

    /// The engine rejected the query syntax; the message is the engine's
    #[error("query error: {0}")]
    Query(String),

    /// The engine could not be reached or timed out
    #[error("search engine unavailable: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Transport status used by the daemon protocol (HTTP-style codes)
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) | ServiceError::Query(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::AlreadyRunning => 409,
            ServiceError::Locked => 423,
            ServiceError::Transport(_) => 503,
            ServiceError::Config(_) | ServiceError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable name
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::AlreadyRunning => "already_running",
            ServiceError::Locked => "locked",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Query(_) => "query",
            ServiceError::Transport(_) => "transport",
            ServiceError::Config(_) => "config",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::AlreadyRunning | ServiceError::Locked | ServiceError::Transport(_)
        )
    }

    /// Payload without the variant prefix; what travels on the wire
    pub fn detail(&self) -> String {
        match self {
            ServiceError::Validation(m)
            | ServiceError::NotFound(m)
            | ServiceError::Query(m)
            | ServiceError::Transport(m)
            | ServiceError::Config(m)
            | ServiceError::Internal(m) => m.clone(),
            ServiceError::AlreadyRunning | ServiceError::Locked => self.to_string(),
        }
    }

    /// Rebuild an error from its wire representation
    pub fn from_wire(kind: &str, message: String) -> Self {
        match kind {
            "validation" => ServiceError::Validation(message),
            "already_running" => ServiceError::AlreadyRunning,
            "locked" => ServiceError::Locked,
            "not_found" => ServiceError::NotFound(message),
            "query" => ServiceError::Query(message),
            "transport" => ServiceError::Transport(message),
            "config" => ServiceError::Config(message),
            _ => ServiceError::Internal(message),
        }
    }
}

/// Errors reported by a search engine implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("engine unreachable: {0}")]
    Unavailable(String),

    /// The engine refused the request (for queries: malformed syntax)
    #[error("{0}")]
    Rejected(String),

    /// The engine answered with something we could not interpret
    #[error("unexpected engine response: {0}")]
    Protocol(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::Unavailable(_))
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Rejected(msg) => ServiceError::Query(msg),
            EngineError::Timeout(_) | EngineError::Unavailable(_) => {
                ServiceError::Transport(e.to_string())
            }
            EngineError::Protocol(_) => ServiceError::Internal(e.to_string()),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
