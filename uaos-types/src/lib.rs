//! Shared identity, value, error, and config types for the UAOS orchestration core.
//!
//! Every other `uaos-*` crate depends on this one; nothing in here depends on
//! them. Splits `identity`, `enums`, `error`, and `config` into separate
//! small modules re-exported from the crate root.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod value;

pub use config::{ClusterParams, EmbeddingParams, UaosConfig};
pub use enums::{
    normalize_token, ArcType, AgentStepType, AgentTaskStatus, ExportFormat, GroupBy,
    HarvestPhase, MergeStrategy, NextAction, PeriodKind, Route,
};
pub use error::{
    AdminError, AgentError, ArchiveError, BookError, BufferError, ClusterError, ConfigError,
    ErrorKind, ExceededLimit, PersonaError, RouterError, SessionError, StoreError, ToolError,
    UaosError, UaosResult,
};
pub use identity::{
    sha256_hex, ArtifactId, BookId, BufferId, ChapterId, ClusterId, ContentHash, DurationMs,
    EntityIdParseError, EntityIdType, HarvestId, NodeId, PersonaId, SearchSessionId, SessionId,
    StepId, StyleId, TaskId, Timestamp, UserId, VersionId,
};
pub use value::Value;
pub use entities::{
    AgentStep, AgentTask, ArchiveNode, Book, BufferBranch, BufferDiff, BufferDiffEntry,
    BufferDiffStats, BufferVersion, Chapter, Cluster, ConfigAuditRecord, HarvestSample,
    HarvestedPassage, LlmCostEntry, MergeConflict, MergeResult, PersonaHarvest, PersonaProfile,
    PromptTemplate, Session, SourceDistributionEntry, StyleProfile, TierLimits, ToolCall,
    ToolResult, UsageTotals, UserTier, UserUsage, VersionedBuffer, VoiceTraits,
};
