//! Archive/Embedding Driver (C9): batches un-embedded archive nodes through
//! the embedding adapter, applying filters, reporting progress, and
//! persisting resulting vectors idempotently.
//!
//! Uses `uaos-tools::ToolExecutor::execute`'s validate -> gate -> run ->
//! time sequencing, generalized here to filter -> batch -> embed -> persist
//! -> report, and the same batch-call shape (`embed_nodes`) that this
//! crate's own mock in `uaos-adapters` already follows.

use std::time::Instant;
use tracing::instrument;
use uaos_adapters::{EmbeddingAdapter, NodeText};
use uaos_store::Store;
use uaos_types::{ArchiveError, ArchiveNode, NodeId, UaosResult};

/// Filter/batch parameters for [`embed_all`], mirroring spec.md §4.8 and the
/// `EmbeddingParams` config group.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub batch_size: usize,
    pub min_word_count: usize,
    pub source_types: Option<Vec<String>>,
    pub author_roles: Option<Vec<String>>,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self { batch_size: 50, min_word_count: 7, source_types: None, author_roles: None }
    }
}

/// Phase markers reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPhase {
    Enumerating,
    Filtering,
    Embedding,
    Complete,
}

impl EmbedPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enumerating => "enumerating",
            Self::Filtering => "filtering",
            Self::Embedding => "embedding",
            Self::Complete => "complete",
        }
    }
}

/// One progress snapshot, fired from [`embed_all`] as batches complete.
#[derive(Debug, Clone)]
pub struct EmbedProgress {
    pub phase: EmbedPhase,
    pub processed: usize,
    pub total: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
}

/// Outcome of [`embed_all`].
#[derive(Debug, Clone, Default)]
pub struct EmbedResult {
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub success: bool,
    pub errors: Vec<(NodeId, String)>,
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Apply the filter chain in spec order: min word count, source types,
/// author roles, then a caller-supplied content filter. Returns the nodes
/// that survived, plus how many were dropped.
fn apply_filters<'a>(
    nodes: &'a [ArchiveNode],
    options: &EmbedOptions,
    content_filter: Option<&dyn Fn(&ArchiveNode) -> bool>,
) -> (Vec<&'a ArchiveNode>, usize) {
    let mut dropped = 0usize;
    let kept: Vec<&ArchiveNode> = nodes
        .iter()
        .filter(|n| {
            let ok = word_count(&n.content) >= options.min_word_count
                && options.source_types.as_ref().map_or(true, |types| types.iter().any(|t| t == &n.source_type))
                && options.author_roles.as_ref().map_or(true, |roles| {
                    n.author_role.as_ref().map_or(false, |r| roles.iter().any(|x| x == r))
                })
                && content_filter.map_or(true, |f| f(n));
            if !ok {
                dropped += 1;
            }
            ok
        })
        .collect();
    (kept, dropped)
}

/// `embedAll(options) -> EmbedResult` (C9). Enumerates nodes needing
/// embeddings, filters them, embeds in batches of `options.batch_size`, and
/// persists the resulting vectors via `store.store_embedding` tagged with
/// the adapter's model id. Already-embedded nodes never surface from
/// `get_nodes_needing_embeddings`, so repeated calls are idempotent:
/// everything that was embedded before is reported as `skipped`, never
/// re-embedded.
#[instrument(skip(store, embedder, content_filter, on_progress))]
pub async fn embed_all(
    store: &dyn Store,
    embedder: &dyn EmbeddingAdapter,
    options: &EmbedOptions,
    content_filter: Option<&dyn Fn(&ArchiveNode) -> bool>,
    mut on_progress: impl FnMut(EmbedProgress),
) -> UaosResult<EmbedResult> {
    let start = Instant::now();
    let stats_before = store.archive_stats().await?;
    let skipped_already_embedded = stats_before.embedded_nodes;

    on_progress(EmbedProgress {
        phase: EmbedPhase::Enumerating,
        processed: 0,
        total: stats_before.pending_nodes,
        current_batch: 0,
        total_batches: 0,
        skipped: skipped_already_embedded,
        failed: 0,
        elapsed_ms: start.elapsed().as_millis() as u64,
        estimated_remaining_ms: None,
    });

    let candidates = store.get_nodes_needing_embeddings(usize::MAX).await?;
    let (filtered, filtered_out) = apply_filters(&candidates, options, content_filter);
    let total = filtered.len();
    let total_batches = total.div_ceil(options.batch_size.max(1));

    on_progress(EmbedProgress {
        phase: EmbedPhase::Filtering,
        processed: 0,
        total,
        current_batch: 0,
        total_batches,
        skipped: skipped_already_embedded + filtered_out,
        failed: 0,
        elapsed_ms: start.elapsed().as_millis() as u64,
        estimated_remaining_ms: None,
    });

    let mut result = EmbedResult { skipped: skipped_already_embedded + filtered_out, ..Default::default() };
    let mut processed = 0usize;

    for (batch_index, chunk) in filtered.chunks(options.batch_size.max(1)).enumerate() {
        let outcome = embed_batch(chunk, store, embedder).await;
        result.embedded += outcome.embedded;
        result.failed += outcome.failed;
        result.errors.extend(outcome.errors);
        processed += chunk.len();

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let estimated_remaining_ms = if processed > 0 && total > processed {
            Some(elapsed_ms.saturating_mul((total - processed) as u64) / processed as u64)
        } else {
            None
        };
        on_progress(EmbedProgress {
            phase: EmbedPhase::Embedding,
            processed,
            total,
            current_batch: batch_index + 1,
            total_batches,
            skipped: result.skipped,
            failed: result.failed,
            elapsed_ms,
            estimated_remaining_ms,
        });
    }

    result.success = result.failed == 0;
    on_progress(EmbedProgress {
        phase: EmbedPhase::Complete,
        processed,
        total,
        current_batch: total_batches,
        total_batches,
        skipped: result.skipped,
        failed: result.failed,
        elapsed_ms: start.elapsed().as_millis() as u64,
        estimated_remaining_ms: Some(0),
    });

    Ok(result)
}

/// Outcome of embedding one batch, used by [`embed_all`] and exposed
/// directly as `embedBatch` in the service API for callers that want to
/// drive batching themselves.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub embedded: usize,
    pub failed: usize,
    pub errors: Vec<(NodeId, String)>,
}

/// Embed one batch of nodes and persist the resulting vectors. A whole-batch
/// adapter failure (the call itself erroring) counts every node in the
/// batch as failed rather than propagating, so the overall driver can keep
/// going across batches.
#[instrument(skip(store, embedder, nodes), fields(batch_size = nodes.len()))]
pub async fn embed_batch(nodes: &[&ArchiveNode], store: &dyn Store, embedder: &dyn EmbeddingAdapter) -> BatchOutcome {
    if nodes.is_empty() {
        return BatchOutcome::default();
    }
    let texts: Vec<NodeText> = nodes.iter().map(|n| NodeText { id: n.id, text: n.content.clone() }).collect();
    match embedder.embed_nodes(&texts).await {
        Ok(embeddings) => {
            let mut outcome = BatchOutcome::default();
            for embedding in embeddings {
                match store.store_embedding(embedding.node_id, embedding.embedding, embedder.model().to_string()).await {
                    Ok(()) => outcome.embedded += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.errors.push((embedding.node_id, e.to_string()));
                    }
                }
            }
            outcome
        }
        Err(e) => {
            let message = ArchiveError::AdapterFailure(e.to_string()).to_string();
            BatchOutcome {
                embedded: 0,
                failed: nodes.len(),
                errors: nodes.iter().map(|n| (n.id, message.clone())).collect(),
            }
        }
    }
}
