//! Cluster Discoverer (C10): seed/grow clustering over embedded archive
//! nodes using cosine-similarity neighborhoods.
//!
//! Grounded on `uaos-archive`'s filter-then-batch shape, generalized here
//! to filter-then-seed-then-grow, and on `uaos-store::cosine_similarity`'s
//! neighbor ranking already exposed through `Store::search_by_embedding`.

use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::instrument;
use uaos_store::Store;
use uaos_types::{ArchiveNode, Cluster, ClusterError, ClusterId, NodeId, SourceDistributionEntry, Timestamp, UaosResult};
use uaos_types::identity::EntityIdType;

/// Parameters for [`discover_clusters`], per spec.md §4.9 and the
/// `ClusterParams` config group.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub sample_size: usize,
    pub max_clusters: usize,
    pub min_cluster_size: usize,
    pub min_similarity: f32,
    pub min_word_count: usize,
    pub exclude_patterns: Vec<String>,
    pub source_types: Option<Vec<String>>,
    pub author_roles: Option<Vec<String>>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            sample_size: 500,
            max_clusters: 10,
            min_cluster_size: 5,
            min_similarity: 0.7,
            min_word_count: 0,
            exclude_patterns: Vec::new(),
            source_types: None,
            author_roles: None,
        }
    }
}

/// `discoverClusters` result: the materialized clusters plus the coverage
/// counts spec.md §4.9 calls for.
#[derive(Debug, Clone, Default)]
pub struct DiscoverReport {
    pub clusters: Vec<Cluster>,
    pub total_passages: usize,
    pub assigned_passages: usize,
    pub noise_passages: usize,
}

fn passes_filters(node: &ArchiveNode, options: &ClusterOptions, excludes: &[regex::Regex]) -> bool {
    node.embedding.is_some()
        && node.word_count >= options.min_word_count
        && options.source_types.as_ref().map_or(true, |types| types.iter().any(|t| t == &node.source_type))
        && options.author_roles.as_ref().map_or(true, |roles| {
            node.author_role.as_ref().map_or(false, |r| roles.iter().any(|x| x == r))
        })
        && !excludes.iter().any(|re| re.is_match(&node.content))
}

fn compile_excludes(patterns: &[String]) -> UaosResult<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| regex::Regex::new(p).map_err(|e| ClusterError::InvalidArgs(format!("invalid exclude pattern {p:?}: {e}")).into()))
        .collect()
}

/// Top-10 lowercased tokens longer than 4 characters, ranked by frequency
/// then alphabetically for deterministic ties.
fn top_keywords(members: &[ArchiveNode]) -> Vec<String> {
    let mut freq: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        for token in member.content.split(|c: char| !c.is_alphanumeric()) {
            let lower = token.to_lowercase();
            if lower.chars().count() > 4 {
                *freq.entry(lower).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(10).map(|(k, _)| k).collect()
}

fn source_histogram(members: &[ArchiveNode]) -> Vec<SourceDistributionEntry> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        *counts.entry(member.source_type.clone()).or_insert(0) += 1;
    }
    counts.into_iter().map(|(source_type, count)| SourceDistributionEntry { source_type, count }).collect()
}

fn date_range(members: &[ArchiveNode]) -> Option<(Timestamp, Timestamp)> {
    let mut range: Option<(Timestamp, Timestamp)> = None;
    for member in members {
        let Some(ts) = member.source_created_at else { continue };
        range = Some(match range {
            None => (ts, ts),
            Some((min_ts, max_ts)) => (min_ts.min(ts), max_ts.max(ts)),
        });
    }
    range
}

/// `discoverClusters(options) -> DiscoverReport` (C10). Draws a random
/// sample of embedded node ids, filters them, then grows clusters by
/// picking unassigned seeds in order and pulling their cosine-similarity
/// neighborhood from the store, stopping once `maxClusters` have been
/// materialized.
#[instrument(skip(store))]
pub async fn discover_clusters(store: &dyn Store, options: &ClusterOptions) -> UaosResult<DiscoverReport> {
    let excludes = compile_excludes(&options.exclude_patterns)?;

    let sample_ids = store.get_random_embedded_node_ids(options.sample_size).await?;
    let mut sampled = Vec::with_capacity(sample_ids.len());
    for id in sample_ids {
        if let Some(node) = store.get_node(id).await? {
            sampled.push(node);
        }
    }

    let filtered: Vec<ArchiveNode> = sampled.into_iter().filter(|n| passes_filters(n, options, &excludes)).collect();
    let total_passages = filtered.len();

    let mut assigned: HashSet<NodeId> = HashSet::new();
    let mut clusters = Vec::new();

    for seed in filtered.iter().take(100) {
        if clusters.len() >= options.max_clusters {
            break;
        }
        if assigned.contains(&seed.id) {
            continue;
        }
        let Some(embedding) = &seed.embedding else { continue };

        let neighbors = store.search_by_embedding(embedding, 100, options.min_similarity).await?;
        let others: Vec<_> = neighbors.into_iter().filter(|m| m.node_id != seed.id && !assigned.contains(&m.node_id)).collect();
        if others.len() + 1 < options.min_cluster_size {
            continue;
        }

        let mut members = vec![seed.clone()];
        for neighbor in &others {
            if let Some(node) = store.get_node(neighbor.node_id).await? {
                members.push(node);
            }
        }

        assigned.insert(seed.id);
        for neighbor in &others {
            assigned.insert(neighbor.node_id);
        }

        let coherence = if others.is_empty() { 1.0 } else { others.iter().map(|m| m.similarity).sum::<f32>() / others.len() as f32 };
        let keywords = top_keywords(&members);
        let label = keywords.first().cloned().unwrap_or_else(|| format!("cluster-{}", clusters.len() + 1));
        let description = format!("{} passages clustered around {}", members.len(), keywords.join(", "));
        let avg_word_count = members.iter().map(|m| m.word_count as f64).sum::<f64>() / members.len() as f64;

        clusters.push(Cluster {
            id: ClusterId::now_v7(),
            label,
            description,
            passages: members.iter().map(|m| m.id).collect(),
            total_passages: members.len(),
            coherence,
            keywords,
            source_distribution: source_histogram(&members),
            date_range: date_range(&members),
            avg_word_count,
        });
    }

    let assigned_passages = assigned.len();
    Ok(DiscoverReport {
        clusters,
        total_passages,
        assigned_passages,
        noise_passages: total_passages.saturating_sub(assigned_passages),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaos_store::InMemoryStore;

    fn node(content: &str, embedding: Vec<f32>, source_type: &str, author_role: &str) -> ArchiveNode {
        ArchiveNode {
            id: NodeId::now_v7(),
            content: content.to_string(),
            source_type: source_type.to_string(),
            author_role: Some(author_role.to_string()),
            word_count: content.split_whitespace().count(),
            source_created_at: None,
            embedding: Some(embedding),
            embedding_model: Some("mock".into()),
        }
    }

    #[tokio::test]
    async fn forms_a_cluster_when_neighborhood_meets_min_size() {
        let store = InMemoryStore::new();
        let mut nodes = Vec::new();
        for _ in 0..6 {
            nodes.push(node("recurring onboarding friction thread", vec![1.0, 0.0], "message", "user"));
        }
        store.seed_nodes(nodes);

        let report = discover_clusters(&store, &ClusterOptions { min_cluster_size: 5, ..Default::default() }).await.unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].total_passages, 6);
        assert!((report.clusters[0].coherence - 1.0).abs() < 1e-6);
        assert_eq!(report.assigned_passages, 6);
        assert_eq!(report.noise_passages, 0);
    }

    #[tokio::test]
    async fn neighborhood_below_min_cluster_size_leaves_nodes_as_noise() {
        let store = InMemoryStore::new();
        store.seed_nodes((0..3).map(|_| node("short isolated passage", vec![1.0, 0.0], "message", "user")));
        let report = discover_clusters(&store, &ClusterOptions { min_cluster_size: 5, ..Default::default() }).await.unwrap();
        assert!(report.clusters.is_empty());
        assert_eq!(report.total_passages, 3);
        assert_eq!(report.assigned_passages, 0);
        assert_eq!(report.noise_passages, 3);
    }

    #[tokio::test]
    async fn zero_embedded_nodes_returns_empty_without_error() {
        let store = InMemoryStore::new();
        let report = discover_clusters(&store, &ClusterOptions::default()).await.unwrap();
        assert_eq!(report.total_passages, 0);
        assert!(report.clusters.is_empty());
    }

    #[tokio::test]
    async fn stops_at_max_clusters() {
        let store = InMemoryStore::new();
        // Three disjoint, mutually dissimilar groups of 5 each.
        let axes = [vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        let mut nodes = Vec::new();
        for axis in &axes {
            for _ in 0..5 {
                nodes.push(node("distinct topic passage words", axis.clone(), "message", "user"));
            }
        }
        store.seed_nodes(nodes);

        let report = discover_clusters(&store, &ClusterOptions { max_clusters: 2, min_cluster_size: 5, sample_size: 100, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(report.clusters.len(), 2);
    }

    #[tokio::test]
    async fn source_type_filter_excludes_non_matching_nodes() {
        let store = InMemoryStore::new();
        store.seed_nodes((0..5).map(|_| node("a message passage here", vec![1.0, 0.0], "message", "user")));
        store.seed_nodes((0..5).map(|_| node("a document passage here", vec![1.0, 0.0], "document", "user")));
        let opts = ClusterOptions { source_types: Some(vec!["message".to_string()]), min_cluster_size: 5, ..Default::default() };
        let report = discover_clusters(&store, &opts).await.unwrap();
        assert_eq!(report.total_passages, 5);
    }

    #[tokio::test]
    async fn exclude_pattern_filters_matching_content() {
        let store = InMemoryStore::new();
        store.seed_nodes((0..5).map(|_| node("contains the banned keyword here", vec![1.0, 0.0], "message", "user")));
        let opts = ClusterOptions { exclude_patterns: vec!["banned".to_string()], ..Default::default() };
        let report = discover_clusters(&store, &opts).await.unwrap();
        assert_eq!(report.total_passages, 0);
    }

    #[test]
    fn invalid_exclude_pattern_is_rejected_synchronously() {
        let patterns = vec!["(unterminated".to_string()];
        assert!(compile_excludes(&patterns).is_err());
    }
}
