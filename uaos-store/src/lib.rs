//! Abstract persistence contract for UAOS (C13) plus an in-memory reference
//! implementation used by tests and by default when no durable backend is
//! configured.
//!
//! Uses one async trait per entity family, `Send + Sync` implementations,
//! CRUD methods named `<entity>_insert`/`_get`/`_update` where that naming
//! fits, with UAOS-specific read paths (`search_by_embedding`,
//! `get_nodes_needing_embeddings`) added for the archive/cluster components.
//! The concrete SQL-backed store is an external collaborator — this crate
//! only defines the contract plus a test-friendly mock, keeping the
//! contract (trait) and any durable implementation (external, not ported
//! here) cleanly split.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uaos_types::{
    ArchiveNode, Book, BookId, Cluster, ClusterId, HarvestId, LlmCostEntry, NodeId, PersonaHarvest,
    PersonaId, PersonaProfile, Session, SessionId, StoreError, StyleId, StyleProfile, Timestamp,
    UaosResult, UserId, UserUsage, VersionedBuffer,
};

// ============================================================================
// STORE-LOCAL DTOs
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub total_nodes: usize,
    pub embedded_nodes: usize,
    pub pending_nodes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: usize,
    pub created_at: Timestamp,
}

/// A cosine-similarity match, used by [`Store::search_by_embedding`] and the
/// cluster discoverer's neighbor queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EmbeddingMatch {
    pub node_id: NodeId,
    pub similarity: f32,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Abstract persistence contract over every entity family the core
/// operates on: sessions, buffers (embedded in sessions), books, clusters,
/// archive nodes/embeddings, persona harvests/personas/styles, cost entries
/// and usage aggregates, and downloadable artifacts.
#[async_trait]
pub trait Store: Send + Sync {
    // --- Sessions (optional persistent rehydration) ---
    async fn save_session(&self, session: &Session) -> UaosResult<()>;
    async fn load_session(&self, id: SessionId) -> UaosResult<Option<Session>>;
    async fn delete_session(&self, id: SessionId) -> UaosResult<()>;
    async fn list_sessions(&self) -> UaosResult<Vec<Session>>;

    // --- Buffers, addressable independent of the owning session's lifecycle ---
    async fn save_buffer(&self, session_id: SessionId, buffer: &VersionedBuffer) -> UaosResult<()>;
    async fn load_buffer(&self, session_id: SessionId, name: &str) -> UaosResult<Option<VersionedBuffer>>;

    // --- Books ---
    async fn save_book(&self, book: &Book) -> UaosResult<()>;
    async fn load_book(&self, id: BookId) -> UaosResult<Option<Book>>;
    async fn list_books(&self, user_id: Option<UserId>) -> UaosResult<Vec<Book>>;

    // --- Clusters ---
    async fn save_cluster(&self, cluster: &Cluster) -> UaosResult<()>;
    async fn load_cluster(&self, id: ClusterId) -> UaosResult<Option<Cluster>>;
    async fn list_clusters(&self) -> UaosResult<Vec<Cluster>>;

    // --- Archive nodes / embeddings (C9, C10) ---
    async fn save_node(&self, node: &ArchiveNode) -> UaosResult<()>;
    async fn get_node(&self, id: NodeId) -> UaosResult<Option<ArchiveNode>>;
    async fn search_by_embedding(
        &self,
        vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> UaosResult<Vec<EmbeddingMatch>>;
    async fn get_random_embedded_node_ids(&self, n: usize) -> UaosResult<Vec<NodeId>>;
    async fn get_nodes_needing_embeddings(&self, limit: usize) -> UaosResult<Vec<ArchiveNode>>;
    async fn store_embedding(&self, node_id: NodeId, vector: Vec<f32>, model: String) -> UaosResult<()>;
    async fn archive_stats(&self) -> UaosResult<ArchiveStats>;

    // --- Persona harvest / personas / styles (C11) ---
    async fn save_harvest(&self, harvest: &PersonaHarvest) -> UaosResult<()>;
    async fn load_harvest(&self, id: HarvestId) -> UaosResult<Option<PersonaHarvest>>;
    async fn delete_harvest(&self, id: HarvestId) -> UaosResult<()>;
    async fn list_harvests(&self, user_id: Option<UserId>) -> UaosResult<Vec<PersonaHarvest>>;
    async fn save_persona(&self, persona: &PersonaProfile) -> UaosResult<()>;
    async fn load_persona(&self, id: PersonaId) -> UaosResult<Option<PersonaProfile>>;
    async fn default_persona(&self, user_id: UserId) -> UaosResult<Option<PersonaProfile>>;
    async fn save_style(&self, style: &StyleProfile) -> UaosResult<()>;
    async fn load_style(&self, id: StyleId) -> UaosResult<Option<StyleProfile>>;
    async fn list_styles(&self, persona_id: PersonaId) -> UaosResult<Vec<StyleProfile>>;

    // --- Cost / usage (C7, C8) ---
    async fn record_cost_entry(&self, entry: &LlmCostEntry) -> UaosResult<()>;
    async fn list_cost_entries(
        &self,
        since: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> UaosResult<Vec<LlmCostEntry>>;
    async fn prune_cost_entries_older_than(&self, cutoff: Timestamp) -> UaosResult<usize>;
    async fn load_usage(&self, user_id: UserId, period: &str) -> UaosResult<Option<UserUsage>>;
    async fn save_usage(&self, usage: &UserUsage) -> UaosResult<()>;

    // --- Artifacts (exported books, downloadable) ---
    async fn save_artifact(&self, artifact: StoredArtifact) -> UaosResult<()>;
    async fn load_artifact(&self, id: &str) -> UaosResult<Option<StoredArtifact>>;
    async fn list_artifacts(&self) -> UaosResult<Vec<ArtifactMeta>>;
}

// ============================================================================
// IN-MEMORY REFERENCE IMPLEMENTATION
// ============================================================================

/// Thread-safe in-memory [`Store`], the default backend when no durable
/// store is configured: plain `RwLock<HashMap<..>>` fields, no eviction of
/// its own (that's the owning component's job).
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    buffers: RwLock<HashMap<(SessionId, String), VersionedBuffer>>,
    books: RwLock<HashMap<BookId, Book>>,
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
    nodes: RwLock<HashMap<NodeId, ArchiveNode>>,
    harvests: RwLock<HashMap<HarvestId, PersonaHarvest>>,
    personas: RwLock<HashMap<PersonaId, PersonaProfile>>,
    styles: RwLock<HashMap<StyleId, StyleProfile>>,
    cost_entries: RwLock<Vec<LlmCostEntry>>,
    usage: RwLock<HashMap<(UserId, String), UserUsage>>,
    artifacts: RwLock<HashMap<String, StoredArtifact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed archive nodes directly (tests, or a bulk-load bootstrap path).
    pub fn seed_nodes(&self, nodes: impl IntoIterator<Item = ArchiveNode>) {
        let mut guard = self.nodes.write().expect("nodes lock poisoned");
        for node in nodes {
            guard.insert(node.id, node);
        }
    }
}

fn poison_err(what: &str) -> StoreError {
    StoreError::Failure(format!("{what} lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_session(&self, session: &Session) -> UaosResult<()> {
        let mut guard = self.sessions.write().map_err(|_| poison_err("sessions"))?;
        guard.insert(session.id, session.clone());
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> UaosResult<Option<Session>> {
        let guard = self.sessions.read().map_err(|_| poison_err("sessions"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn delete_session(&self, id: SessionId) -> UaosResult<()> {
        let mut guard = self.sessions.write().map_err(|_| poison_err("sessions"))?;
        guard.remove(&id);
        Ok(())
    }

    async fn list_sessions(&self) -> UaosResult<Vec<Session>> {
        let guard = self.sessions.read().map_err(|_| poison_err("sessions"))?;
        Ok(guard.values().cloned().collect())
    }

    async fn save_buffer(&self, session_id: SessionId, buffer: &VersionedBuffer) -> UaosResult<()> {
        let mut guard = self.buffers.write().map_err(|_| poison_err("buffers"))?;
        guard.insert((session_id, buffer.name.clone()), buffer.clone());
        Ok(())
    }

    async fn load_buffer(&self, session_id: SessionId, name: &str) -> UaosResult<Option<VersionedBuffer>> {
        let guard = self.buffers.read().map_err(|_| poison_err("buffers"))?;
        Ok(guard.get(&(session_id, name.to_string())).cloned())
    }

    async fn save_book(&self, book: &Book) -> UaosResult<()> {
        let mut guard = self.books.write().map_err(|_| poison_err("books"))?;
        guard.insert(book.id, book.clone());
        Ok(())
    }

    async fn load_book(&self, id: BookId) -> UaosResult<Option<Book>> {
        let guard = self.books.read().map_err(|_| poison_err("books"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_books(&self, user_id: Option<UserId>) -> UaosResult<Vec<Book>> {
        let guard = self.books.read().map_err(|_| poison_err("books"))?;
        Ok(guard
            .values()
            .filter(|b| user_id.is_none() || b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn save_cluster(&self, cluster: &Cluster) -> UaosResult<()> {
        let mut guard = self.clusters.write().map_err(|_| poison_err("clusters"))?;
        guard.insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn load_cluster(&self, id: ClusterId) -> UaosResult<Option<Cluster>> {
        let guard = self.clusters.read().map_err(|_| poison_err("clusters"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_clusters(&self) -> UaosResult<Vec<Cluster>> {
        let guard = self.clusters.read().map_err(|_| poison_err("clusters"))?;
        Ok(guard.values().cloned().collect())
    }

    async fn save_node(&self, node: &ArchiveNode) -> UaosResult<()> {
        let mut guard = self.nodes.write().map_err(|_| poison_err("nodes"))?;
        guard.insert(node.id, node.clone());
        Ok(())
    }

    async fn get_node(&self, id: NodeId) -> UaosResult<Option<ArchiveNode>> {
        let guard = self.nodes.read().map_err(|_| poison_err("nodes"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn search_by_embedding(
        &self,
        vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> UaosResult<Vec<EmbeddingMatch>> {
        let guard = self.nodes.read().map_err(|_| poison_err("nodes"))?;
        let mut matches: Vec<EmbeddingMatch> = guard
            .values()
            .filter_map(|n| {
                let emb = n.embedding.as_ref()?;
                let sim = cosine_similarity(vector, emb);
                (sim >= threshold).then_some(EmbeddingMatch {
                    node_id: n.id,
                    similarity: sim,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get_random_embedded_node_ids(&self, n: usize) -> UaosResult<Vec<NodeId>> {
        let guard = self.nodes.read().map_err(|_| poison_err("nodes"))?;
        // Deterministic "random" sample: stable node id order, since the
        // core must not call the forbidden nondeterministic RNG primitives
        // at workflow-script time; production backends shuffle server-side.
        let mut ids: Vec<NodeId> = guard
            .values()
            .filter(|n| n.embedding.is_some())
            .map(|n| n.id)
            .collect();
        ids.sort_by_key(|id| id.as_uuid());
        ids.truncate(n);
        Ok(ids)
    }

    async fn get_nodes_needing_embeddings(&self, limit: usize) -> UaosResult<Vec<ArchiveNode>> {
        let guard = self.nodes.read().map_err(|_| poison_err("nodes"))?;
        Ok(guard
            .values()
            .filter(|n| n.embedding.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn store_embedding(&self, node_id: NodeId, vector: Vec<f32>, model: String) -> UaosResult<()> {
        let mut guard = self.nodes.write().map_err(|_| poison_err("nodes"))?;
        let node = guard
            .get_mut(&node_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "node".into(),
                id: node_id.to_string(),
            })?;
        node.embedding = Some(vector);
        node.embedding_model = Some(model);
        Ok(())
    }

    async fn archive_stats(&self) -> UaosResult<ArchiveStats> {
        let guard = self.nodes.read().map_err(|_| poison_err("nodes"))?;
        let total_nodes = guard.len();
        let embedded_nodes = guard.values().filter(|n| n.embedding.is_some()).count();
        Ok(ArchiveStats {
            total_nodes,
            embedded_nodes,
            pending_nodes: total_nodes - embedded_nodes,
        })
    }

    async fn save_harvest(&self, harvest: &PersonaHarvest) -> UaosResult<()> {
        let mut guard = self.harvests.write().map_err(|_| poison_err("harvests"))?;
        guard.insert(harvest.id, harvest.clone());
        Ok(())
    }

    async fn load_harvest(&self, id: HarvestId) -> UaosResult<Option<PersonaHarvest>> {
        let guard = self.harvests.read().map_err(|_| poison_err("harvests"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn delete_harvest(&self, id: HarvestId) -> UaosResult<()> {
        let mut guard = self.harvests.write().map_err(|_| poison_err("harvests"))?;
        guard.remove(&id);
        Ok(())
    }

    async fn list_harvests(&self, user_id: Option<UserId>) -> UaosResult<Vec<PersonaHarvest>> {
        let guard = self.harvests.read().map_err(|_| poison_err("harvests"))?;
        Ok(guard
            .values()
            .filter(|h| user_id.is_none() || Some(h.user_id) == user_id)
            .cloned()
            .collect())
    }

    async fn save_persona(&self, persona: &PersonaProfile) -> UaosResult<()> {
        let mut guard = self.personas.write().map_err(|_| poison_err("personas"))?;
        guard.insert(persona.id, persona.clone());
        Ok(())
    }

    async fn load_persona(&self, id: PersonaId) -> UaosResult<Option<PersonaProfile>> {
        let guard = self.personas.read().map_err(|_| poison_err("personas"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn default_persona(&self, user_id: UserId) -> UaosResult<Option<PersonaProfile>> {
        let guard = self.personas.read().map_err(|_| poison_err("personas"))?;
        Ok(guard
            .values()
            .find(|p| p.user_id == user_id && p.is_default)
            .cloned())
    }

    async fn save_style(&self, style: &StyleProfile) -> UaosResult<()> {
        let mut guard = self.styles.write().map_err(|_| poison_err("styles"))?;
        guard.insert(style.id, style.clone());
        Ok(())
    }

    async fn load_style(&self, id: StyleId) -> UaosResult<Option<StyleProfile>> {
        let guard = self.styles.read().map_err(|_| poison_err("styles"))?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_styles(&self, persona_id: PersonaId) -> UaosResult<Vec<StyleProfile>> {
        let guard = self.styles.read().map_err(|_| poison_err("styles"))?;
        Ok(guard
            .values()
            .filter(|s| s.persona_id == persona_id)
            .cloned()
            .collect())
    }

    async fn record_cost_entry(&self, entry: &LlmCostEntry) -> UaosResult<()> {
        let mut guard = self.cost_entries.write().map_err(|_| poison_err("cost_entries"))?;
        guard.push(entry.clone());
        Ok(())
    }

    async fn list_cost_entries(
        &self,
        since: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> UaosResult<Vec<LlmCostEntry>> {
        let guard = self.cost_entries.read().map_err(|_| poison_err("cost_entries"))?;
        Ok(guard
            .iter()
            .filter(|e| since.map_or(true, |s| e.timestamp >= s) && until.map_or(true, |u| e.timestamp <= u))
            .cloned()
            .collect())
    }

    async fn prune_cost_entries_older_than(&self, cutoff: Timestamp) -> UaosResult<usize> {
        let mut guard = self.cost_entries.write().map_err(|_| poison_err("cost_entries"))?;
        let before = guard.len();
        guard.retain(|e| e.timestamp >= cutoff);
        Ok(before - guard.len())
    }

    async fn load_usage(&self, user_id: UserId, period: &str) -> UaosResult<Option<UserUsage>> {
        let guard = self.usage.read().map_err(|_| poison_err("usage"))?;
        Ok(guard.get(&(user_id, period.to_string())).cloned())
    }

    async fn save_usage(&self, usage: &UserUsage) -> UaosResult<()> {
        let mut guard = self.usage.write().map_err(|_| poison_err("usage"))?;
        guard.insert((usage.user_id, usage.period.clone()), usage.clone());
        Ok(())
    }

    async fn save_artifact(&self, artifact: StoredArtifact) -> UaosResult<()> {
        let mut guard = self.artifacts.write().map_err(|_| poison_err("artifacts"))?;
        guard.insert(artifact.id.clone(), artifact);
        Ok(())
    }

    async fn load_artifact(&self, id: &str) -> UaosResult<Option<StoredArtifact>> {
        let guard = self.artifacts.read().map_err(|_| poison_err("artifacts"))?;
        Ok(guard.get(id).cloned())
    }

    async fn list_artifacts(&self) -> UaosResult<Vec<ArtifactMeta>> {
        let guard = self.artifacts.read().map_err(|_| poison_err("artifacts"))?;
        Ok(guard
            .values()
            .map(|a| ArtifactMeta {
                id: a.id.clone(),
                name: a.name.clone(),
                content_type: a.content_type.clone(),
                size: a.bytes.len(),
                created_at: a.created_at,
            })
            .collect())
    }
}

/// Cosine similarity between two equal-length vectors, `0.0` if either is
/// empty, mismatched in length, or zero-norm. Exposed for callers (the
/// cluster discoverer's centroid distance, the book assembler's passage
/// relevance) that need the same similarity function `search_by_embedding`
/// uses internally.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaos_types::identity::EntityIdType;

    fn node(id: NodeId, embedding: Option<Vec<f32>>) -> ArchiveNode {
        ArchiveNode {
            id,
            content: "text".into(),
            source_type: "message".into(),
            author_role: Some("user".into()),
            word_count: 10,
            source_created_at: None,
            embedding,
            embedding_model: None,
        }
    }

    #[tokio::test]
    async fn nodes_needing_embeddings_excludes_embedded() {
        let store = InMemoryStore::new();
        let a = NodeId::now_v7();
        let b = NodeId::now_v7();
        store.seed_nodes([node(a, None), node(b, Some(vec![1.0, 0.0]))]);
        let pending = store.get_nodes_needing_embeddings(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a);
    }

    #[tokio::test]
    async fn store_embedding_then_search_finds_it() {
        let store = InMemoryStore::new();
        let a = NodeId::now_v7();
        store.seed_nodes([node(a, None)]);
        store.store_embedding(a, vec![1.0, 0.0], "test-model".into()).await.unwrap();
        let matches = store.search_by_embedding(&[1.0, 0.0], 10, 0.9).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].node_id, a);
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn archive_stats_counts_embedded_and_pending() {
        let store = InMemoryStore::new();
        store.seed_nodes([
            node(NodeId::now_v7(), Some(vec![1.0])),
            node(NodeId::now_v7(), None),
            node(NodeId::now_v7(), None),
        ]);
        let stats = store.archive_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.embedded_nodes, 1);
        assert_eq!(stats.pending_nodes, 2);
    }

    #[tokio::test]
    async fn cost_entries_prune_is_independent_of_usage() {
        let store = InMemoryStore::new();
        let user = UserId::now_v7();
        let old = LlmCostEntry {
            id: uaos_types::ArtifactId::now_v7(),
            timestamp: chrono::Utc::now() - chrono::Duration::days(200),
            user_id: Some(user),
            session_id: None,
            model: "m".into(),
            operation: "op".into(),
            input_tokens: 10,
            output_tokens: 10,
            cost_cents: 1.0,
            latency_ms: 5,
            success: true,
            error: None,
        };
        store.record_cost_entry(&old).await.unwrap();
        let pruned = store
            .prune_cost_entries_older_than(chrono::Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.list_cost_entries(None, None).await.unwrap().len(), 0);
    }
}
