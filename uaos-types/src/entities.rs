//! Shared domain entities persisted or passed between components.
//!
//! Plain serde structs with no behavior of their own. The logic that
//! mutates them (buffer commit/merge, the agent loop's state machine, the
//! persona FSM, book assembly) lives in the crate that owns that component;
//! this module exists so `uaos-store`
//! and every component crate can share one definition without a dependency
//! cycle (component crates depend on `uaos-store`, `uaos-store` depends only
//! on `uaos-types`).

use crate::enums::{AgentStepType, AgentTaskStatus, HarvestPhase};
use crate::identity::{
    ArtifactId, BookId, BufferId, ChapterId, ClusterId, ContentHash, DurationMs, HarvestId, NodeId,
    PersonaId, SearchSessionId, SessionId, StepId, StyleId, TaskId, Timestamp, UserId, VersionId,
};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// SESSION
// ============================================================================

/// A tenant interaction. Exclusively owns its [`VersionedBuffer`]s by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Option<UserId>,
    pub name: Option<String>,
    pub buffers: HashMap<String, VersionedBuffer>,
    pub active_buffer_name: Option<String>,
    pub search_session_id: Option<SearchSessionId>,
    pub current_task: Option<TaskId>,
    pub task_history: Vec<TaskId>,
    pub command_history: Vec<String>,
    pub variables: HashMap<String, Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
    pub command_count: u64,
    pub search_count: u64,
    pub task_count: u64,
}

impl Session {
    pub fn new(id: SessionId, user_id: Option<UserId>, name: Option<String>, now: Timestamp, ttl: chrono::Duration) -> Self {
        Self {
            id,
            user_id,
            name,
            buffers: HashMap::new(),
            active_buffer_name: None,
            search_session_id: None,
            current_task: None,
            task_history: Vec::new(),
            command_history: Vec::new(),
            variables: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            command_count: 0,
            search_count: 0,
            task_count: 0,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

// ============================================================================
// VERSIONED BUFFER
// ============================================================================

/// A named, ordered sequence of opaque items with branch/commit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedBuffer {
    pub id: BufferId,
    pub name: String,
    pub branches: HashMap<String, BufferBranch>,
    pub versions: HashMap<VersionId, BufferVersion>,
    pub current_branch: String,
    pub working_content: Vec<Value>,
    pub is_dirty: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub content_schema: Option<String>,
}

/// An immutable snapshot in a buffer's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferVersion {
    pub id: VersionId,
    pub content: Vec<Value>,
    pub message: String,
    pub timestamp: Timestamp,
    pub parent_id: Option<VersionId>,
    /// Second parent, set only for merge commits.
    pub merge_parent_id: Option<VersionId>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
}

/// A named pointer into a buffer's version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferBranch {
    pub name: String,
    pub head_version_id: VersionId,
    pub created_at: Timestamp,
    pub description: Option<String>,
    pub parent_branch: Option<String>,
}

/// Per-index difference between two content snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDiffEntry {
    pub index: usize,
    pub value: Value,
}

/// Result of `diff(name, from, to)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferDiff {
    pub added: Vec<BufferDiffEntry>,
    pub removed: Vec<BufferDiffEntry>,
    pub modified: Vec<(BufferDiffEntry, BufferDiffEntry)>,
    pub stats: BufferDiffStats,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDiffStats {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

/// A single index conflict surfaced by an `auto`-strategy merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub index: usize,
    pub ours: Option<Value>,
    pub theirs: Option<Value>,
    pub base: Option<Value>,
}

/// Result of [`merge`](https://docs.rs) — returned by the buffer manager, not
/// an error: a conflicted merge is a normal (if unsuccessful) outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub new_version_id: Option<VersionId>,
    pub conflicts: Vec<MergeConflict>,
    pub merged_content: Option<Vec<Value>>,
}

// ============================================================================
// AGENT TASK / STEP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub session_id: SessionId,
    pub request: String,
    pub status: AgentTaskStatus,
    pub steps: Vec<AgentStep>,
    pub plan: Option<String>,
    pub current_step_index: usize,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub total_tokens: i64,
    pub total_cost_cents: f64,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: StepId,
    pub step_type: AgentStepType,
    pub content: String,
    pub tool_call: Option<ToolCall>,
    pub tool_result: Option<ToolResult>,
    pub timestamp: Timestamp,
    pub duration_ms: DurationMs,
    pub tokens: i64,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub tokens_used: Option<i64>,
    pub cost_cents: Option<f64>,
    pub duration_ms: DurationMs,
    pub warnings: Vec<String>,
}

// ============================================================================
// ADMIN / COST / TIER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub tokens_per_day: i64,
    pub tokens_per_month: i64,
    pub requests_per_minute: i64,
    pub max_concurrent_tasks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTier {
    pub id: String,
    pub name: String,
    pub limits: TierLimits,
    pub allowed_models: BTreeSet<String>,
    pub features: BTreeSet<String>,
    pub priority: i32,
    pub public: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub tokens_used: i64,
    pub request_count: i64,
    pub cost_cents: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUsage {
    pub user_id: UserId,
    pub period: String,
    pub totals: UsageTotals,
    pub by_model: BTreeMap<String, UsageTotals>,
    pub by_operation: BTreeMap<String, UsageTotals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCostEntry {
    pub id: ArtifactId,
    pub timestamp: Timestamp,
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub model: String,
    pub operation: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_cents: f64,
    pub latency_ms: DurationMs,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigAuditRecord {
    pub category: String,
    pub key: String,
    pub value: Value,
    pub reason: Option<String>,
    pub changed_at: Timestamp,
    pub changed_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub template: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// ARCHIVE NODE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveNode {
    pub id: NodeId,
    pub content: String,
    pub source_type: String,
    pub author_role: Option<String>,
    pub word_count: usize,
    pub source_created_at: Option<Timestamp>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
}

// ============================================================================
// CLUSTER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDistributionEntry {
    pub source_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub label: String,
    pub description: String,
    pub passages: Vec<NodeId>,
    pub total_passages: usize,
    pub coherence: f32,
    pub keywords: Vec<String>,
    pub source_distribution: Vec<SourceDistributionEntry>,
    pub date_range: Option<(Timestamp, Timestamp)>,
    pub avg_word_count: f64,
}

// ============================================================================
// PERSONA HARVEST / STYLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSample {
    pub text: String,
    pub source_node_id: Option<NodeId>,
    pub relevance: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTraits {
    pub traits: BTreeMap<String, f32>,
    pub tone_markers: Vec<String>,
    pub formality_range: Option<(f32, f32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaHarvest {
    pub id: HarvestId,
    pub user_id: UserId,
    pub name: String,
    pub phase: HarvestPhase,
    pub samples: Vec<HarvestSample>,
    pub seen_node_ids: BTreeSet<NodeId>,
    pub extracted_traits: Option<VoiceTraits>,
    pub persona_id: Option<PersonaId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: PersonaId,
    pub user_id: UserId,
    pub name: String,
    pub is_default: bool,
    pub voice_traits: VoiceTraits,
    pub example_text_refs: Vec<NodeId>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleProfile {
    pub id: StyleId,
    pub persona_id: PersonaId,
    pub name: String,
    pub is_default: bool,
    pub descriptors: BTreeMap<String, Value>,
    pub example_text_refs: Vec<NodeId>,
}

// ============================================================================
// BOOK / CHAPTER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestedPassage {
    pub source_node_id: NodeId,
    pub text: String,
    pub relevance: f32,
    pub source_type: String,
    pub source_created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub content: String,
    pub passage_source_ids: Vec<NodeId>,
    pub order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub user_id: Option<UserId>,
    pub cluster_id: Option<ClusterId>,
    pub persona_id: Option<PersonaId>,
    pub title: String,
    pub description: String,
    pub introduction: Option<String>,
    pub chapters: Vec<Chapter>,
    pub created_at: Timestamp,
    pub content_hash: Option<ContentHash>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityIdType;

    #[test]
    fn session_new_sets_expiry_from_ttl() {
        let now = chrono::Utc::now();
        let s = Session::new(SessionId::now_v7(), None, None, now, chrono::Duration::seconds(60));
        assert_eq!(s.expires_at, now + chrono::Duration::seconds(60));
        assert!(!s.is_expired(now));
        assert!(s.is_expired(now + chrono::Duration::seconds(61)));
    }
}
