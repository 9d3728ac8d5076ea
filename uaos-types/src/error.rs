//! Layered error taxonomy.
//!
//! Each concern gets its own `thiserror` enum; `UaosError` composes them via
//! `#[from]`. Every concrete variant maps onto one of the fourteen taxonomy
//! kinds through [`UaosError::kind`], so cross-cutting code (the router's
//! fallback, the façade's public API) can reason about failure class
//! without matching every variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single exceeded-limit record, attached to `ErrorKind::LimitExceeded`
/// and surfaced to clients for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceededLimit {
    pub limit: String,
    pub current: i64,
    pub maximum: i64,
    pub percent_over: f64,
}

impl ExceededLimit {
    pub fn new(limit: impl Into<String>, current: i64, maximum: i64) -> Self {
        let percent_over = if maximum > 0 {
            ((current - maximum) as f64 / maximum as f64) * 100.0
        } else {
            0.0
        };
        Self {
            limit: limit.into(),
            current,
            maximum,
            percent_over,
        }
    }
}

/// Taxonomy of failure classes, independent of which component raised it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidArgs,
    WrongPhase,
    UncommittedChanges,
    NothingToCommit,
    NoSuchAncestor,
    BranchExists,
    MergeConflict,
    ApprovalDenied,
    TimeoutExceeded,
    LimitExceeded(ExceededLimit),
    ModelNotAllowed,
    AdapterFailure,
    StoreFailure,
    Internal,
}

// ============================================================================
// Per-concern error enums
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("not found: {entity} {id}")]
    NotFound { entity: String, id: String },
    #[error("store failure: {0}")]
    Failure(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("invalid session arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BufferError {
    #[error("buffer not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("nothing to commit on buffer {0}")]
    NothingToCommit(String),
    #[error("uncommitted changes on buffer {0}")]
    UncommittedChanges(String),
    #[error("no such ancestor: walked past root of buffer {0}")]
    NoSuchAncestor(String),
    #[error("branch already exists: {0}")]
    BranchExists(String),
    #[error("merge conflict on buffer {0}: {count} conflicting item(s)")]
    MergeConflict { buffer: String, count: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    #[error("approval denied for action: {0}")]
    ApprovalDenied(String),
    #[error("tool call timed out after {0}ms")]
    TimeoutExceeded(u64),
    #[error("tool adapter failure: {0}")]
    AdapterFailure(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task is in terminal state and rejects further mutation: {0}")]
    WrongPhase(String),
    #[error("max steps exceeded")]
    MaxStepsExceeded,
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("llm adapter failure: {0}")]
    AdapterFailure(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdminError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("unknown tier: {0}")]
    ModelNotAllowed(String),
    #[error("limit exceeded")]
    LimitExceeded(ExceededLimit),
    #[error("cannot delete the free tier")]
    WrongPhase(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArchiveError {
    #[error("embedding adapter failure: {0}")]
    AdapterFailure(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClusterError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PersonaError {
    #[error("harvest not found: {0}")]
    NotFound(String),
    #[error("wrong phase for operation: expected {expected}, got {actual}")]
    WrongPhase { expected: String, actual: String },
    #[error("cannot extract traits from zero samples")]
    NoSamples,
    #[error("voice-analyzer adapter failure: {0}")]
    AdapterFailure(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BookError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("rewrite adapter failure: {0}")]
    AdapterFailure(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouterError {
    #[error("no handler available for route: {0}")]
    NoHandler(String),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Master error
// ============================================================================

/// Aggregate error for every UAOS operation. Uses an `#[from]`-composition
/// pattern: each concern's error type converts into this with `?`, and
/// [`UaosError::kind`] exposes the taxonomy kind for callers that only
/// care about the failure class.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UaosError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Persona(#[from] PersonaError),
    #[error(transparent)]
    Book(#[from] BookError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type UaosResult<T> = Result<T, UaosError>;

impl UaosError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UaosError::Session(e) => match e {
                SessionError::NotFound(_) => ErrorKind::NotFound,
                SessionError::InvalidArgs(_) => ErrorKind::InvalidArgs,
                SessionError::Store(e) => e.kind(),
            },
            UaosError::Buffer(e) => e.kind(),
            UaosError::Tool(e) => e.kind(),
            UaosError::Agent(e) => match e {
                AgentError::NotFound(_) => ErrorKind::NotFound,
                AgentError::WrongPhase(_) => ErrorKind::WrongPhase,
                AgentError::MaxStepsExceeded => ErrorKind::TimeoutExceeded,
                AgentError::Tool(e) => e.kind(),
                AgentError::AdapterFailure(_) => ErrorKind::AdapterFailure,
            },
            UaosError::Admin(e) => match e {
                AdminError::NotFound(_) => ErrorKind::NotFound,
                AdminError::InvalidArgs(_) => ErrorKind::InvalidArgs,
                AdminError::ModelNotAllowed(_) => ErrorKind::ModelNotAllowed,
                AdminError::LimitExceeded(l) => ErrorKind::LimitExceeded(l.clone()),
                AdminError::WrongPhase(_) => ErrorKind::WrongPhase,
                AdminError::Store(e) => e.kind(),
            },
            UaosError::Archive(e) => match e {
                ArchiveError::AdapterFailure(_) => ErrorKind::AdapterFailure,
                ArchiveError::Store(e) => e.kind(),
            },
            UaosError::Cluster(e) => match e {
                ClusterError::InvalidArgs(_) => ErrorKind::InvalidArgs,
                ClusterError::Store(e) => e.kind(),
            },
            UaosError::Persona(e) => match e {
                PersonaError::NotFound(_) => ErrorKind::NotFound,
                PersonaError::WrongPhase { .. } => ErrorKind::WrongPhase,
                PersonaError::NoSamples => ErrorKind::InvalidArgs,
                PersonaError::AdapterFailure(_) => ErrorKind::AdapterFailure,
                PersonaError::Store(e) => e.kind(),
            },
            UaosError::Book(e) => match e {
                BookError::NotFound(_) => ErrorKind::NotFound,
                BookError::InvalidArgs(_) => ErrorKind::InvalidArgs,
                BookError::AdapterFailure(_) => ErrorKind::AdapterFailure,
                BookError::Store(e) => e.kind(),
            },
            UaosError::Router(e) => match e {
                RouterError::NoHandler(_) => ErrorKind::NotFound,
                RouterError::Tool(e) => e.kind(),
            },
            UaosError::Store(e) => e.kind(),
            UaosError::Config(_) => ErrorKind::InvalidArgs,
            UaosError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Failure(_) => ErrorKind::StoreFailure,
        }
    }
}

impl BufferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BufferError::NotFound(_) => ErrorKind::NotFound,
            BufferError::InvalidArgs(_) => ErrorKind::InvalidArgs,
            BufferError::NothingToCommit(_) => ErrorKind::NothingToCommit,
            BufferError::UncommittedChanges(_) => ErrorKind::UncommittedChanges,
            BufferError::NoSuchAncestor(_) => ErrorKind::NoSuchAncestor,
            BufferError::BranchExists(_) => ErrorKind::BranchExists,
            BufferError::MergeConflict { .. } => ErrorKind::MergeConflict,
            BufferError::Store(e) => e.kind(),
        }
    }
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::InvalidArgs(_) => ErrorKind::InvalidArgs,
            ToolError::ApprovalDenied(_) => ErrorKind::ApprovalDenied,
            ToolError::TimeoutExceeded(_) => ErrorKind::TimeoutExceeded,
            ToolError::AdapterFailure(_) => ErrorKind::AdapterFailure,
            ToolError::Buffer(e) => e.kind(),
        }
    }
}
