//! Book Assembler (C12): turns a cluster into a persisted, optionally
//! persona-rewritten book, plus a standalone search-adapter-backed
//! `harvest` and the three export-format pure functions.
//!
//! Grounded on `uaos-cluster`'s filter-then-materialize shape for passage
//! gathering, and on `uaos-archive`'s embedding-adapter-plus-store
//! indexing pattern for the chapter/apex node persistence step.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use uaos_adapters::{EmbeddingAdapter, RewriteAdapter};
use uaos_store::{cosine_similarity, Store};
use uaos_types::identity::EntityIdType;
use uaos_types::{
    sha256_hex, ArcType, ArchiveNode, Book, BookError, BookId, Chapter, ChapterId, Cluster,
    ClusterId, HarvestedPassage, NodeId, PersonaId, PersonaProfile, StyleProfile, Timestamp,
    UaosResult, UserId,
};

/// Parameters for [`BookAssembler::create_book_from_cluster`], per
/// spec.md §4.11.
#[derive(Debug, Clone)]
pub struct BookOptions {
    pub user_id: Option<UserId>,
    pub persona_id: Option<PersonaId>,
    pub use_default_persona: bool,
    pub max_passages: usize,
    pub arc_type: ArcType,
    pub rewrite_passes: usize,
    pub index_in_archive: bool,
}

impl Default for BookOptions {
    fn default() -> Self {
        Self {
            user_id: None,
            persona_id: None,
            use_default_persona: true,
            max_passages: 50,
            arc_type: ArcType::Chronological,
            rewrite_passes: 3,
            index_in_archive: true,
        }
    }
}

/// Phase markers fired through [`BookAssembler::create_book_from_cluster`]'s
/// progress callback, in order; `PersonaRewriting` and `Indexing` are
/// skipped when no persona is active or indexing is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookPhase {
    Gathering,
    GeneratingArc,
    Assembling,
    PersonaRewriting,
    Indexing,
    Complete,
}

#[derive(Debug, Clone)]
pub struct BookProgress {
    pub phase: BookPhase,
    pub detail: String,
}

/// Parameters for the standalone [`BookAssembler::harvest`] search.
#[derive(Debug, Clone)]
pub struct BookHarvestOptions {
    pub limit: usize,
    pub min_relevance: f32,
    pub date_range: Option<(Timestamp, Timestamp)>,
    pub exclude_ids: Vec<NodeId>,
    pub max_from_single_source: Option<usize>,
}

impl Default for BookHarvestOptions {
    fn default() -> Self {
        Self { limit: 50, min_relevance: 0.0, date_range: None, exclude_ids: Vec::new(), max_from_single_source: None }
    }
}

fn centroid_embedding(nodes: &[ArchiveNode]) -> Option<Vec<f32>> {
    let dims = nodes.iter().find_map(|n| n.embedding.as_ref().map(|e| e.len()))?;
    let mut sum = vec![0.0f32; dims];
    let mut count = 0usize;
    for node in nodes {
        if let Some(embedding) = &node.embedding {
            if embedding.len() == dims {
                for (total, value) in sum.iter_mut().zip(embedding) {
                    *total += value;
                }
                count += 1;
            }
        }
    }
    (count > 0).then(|| {
        for value in &mut sum {
            *value /= count as f32;
        }
        sum
    })
}

/// A deterministic stand-in for a random shuffle: an `exploratory` arc
/// orders passages by the hash of `(nodeId, clusterId)` rather than an
/// actual RNG, the same "sort by a stable hash" substitute
/// `Store::get_random_embedded_node_ids` already uses for sampling.
fn shuffle_key(node_id: NodeId, cluster_id: ClusterId) -> String {
    sha256_hex(format!("{node_id}:{cluster_id}").as_bytes())
}

fn generate_arc(mut passages: Vec<HarvestedPassage>, arc_type: ArcType, cluster_id: ClusterId) -> Vec<HarvestedPassage> {
    match arc_type {
        ArcType::Chronological => {
            passages.sort_by(|a, b| match (a.source_created_at, b.source_created_at) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            });
        }
        ArcType::Thematic => {
            let mut seen_order = Vec::new();
            for p in &passages {
                if !seen_order.contains(&p.source_type) {
                    seen_order.push(p.source_type.clone());
                }
            }
            passages.sort_by(|a, b| {
                let ia = seen_order.iter().position(|t| t == &a.source_type).unwrap_or(usize::MAX);
                let ib = seen_order.iter().position(|t| t == &b.source_type).unwrap_or(usize::MAX);
                ia.cmp(&ib).then_with(|| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal))
            });
        }
        ArcType::Dramatic => {
            passages.sort_by(|a, b| a.relevance.partial_cmp(&b.relevance).unwrap_or(std::cmp::Ordering::Equal));
        }
        ArcType::Exploratory => {
            passages.sort_by_key(|p| shuffle_key(p.source_node_id, cluster_id));
        }
    }
    passages
}

fn chapter_count(passage_count: usize) -> usize {
    if passage_count == 0 {
        return 0;
    }
    ((passage_count as f64 / 10.0).ceil() as usize).clamp(3, 5)
}

fn split_chapters(passages: &[HarvestedPassage]) -> Vec<Chapter> {
    let count = chapter_count(passages.len());
    if count == 0 {
        return Vec::new();
    }
    let base = passages.len() / count;
    let remainder = passages.len() % count;
    let mut chapters = Vec::with_capacity(count);
    let mut cursor = 0;
    for order in 0..count {
        let take = base + usize::from(order < remainder);
        let slice = &passages[cursor..cursor + take];
        cursor += take;
        let content = slice.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n\n---\n\n");
        let title = content.split_whitespace().take(5).collect::<Vec<_>>().join(" ");
        chapters.push(Chapter {
            id: ChapterId::now_v7(),
            title,
            content,
            passage_source_ids: slice.iter().map(|p| p.source_node_id).collect(),
            order,
        });
    }
    chapters
}

/// Owns no state: every cluster/persona/style/book lives in the injected
/// [`Store`]. Holds the embedding and rewrite adapters the assembly
/// pipeline calls across its `assembling`/`persona_rewriting`/`indexing`
/// phases.
pub struct BookAssembler {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingAdapter>,
    rewriter: Arc<dyn RewriteAdapter>,
}

impl BookAssembler {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingAdapter>, rewriter: Arc<dyn RewriteAdapter>) -> Self {
        Self { store, embedder, rewriter }
    }

    async fn resolve_persona(&self, options: &BookOptions) -> UaosResult<Option<PersonaProfile>> {
        if let Some(id) = options.persona_id {
            let persona = self.store.load_persona(id).await?.ok_or_else(|| BookError::NotFound(id.to_string()))?;
            return Ok(Some(persona));
        }
        if options.use_default_persona {
            if let Some(user_id) = options.user_id {
                return Ok(self.store.default_persona(user_id).await?);
            }
        }
        Ok(None)
    }

    async fn default_style(&self, persona_id: PersonaId) -> UaosResult<Option<StyleProfile>> {
        let styles = self.store.list_styles(persona_id).await?;
        Ok(styles.into_iter().find(|s| s.is_default))
    }

    async fn gather_passages(&self, cluster: &Cluster, max_passages: usize) -> UaosResult<Vec<HarvestedPassage>> {
        let take = cluster.passages.len().min(max_passages);
        let mut nodes = Vec::with_capacity(take);
        for id in &cluster.passages[..take] {
            if let Some(node) = self.store.get_node(*id).await? {
                nodes.push(node);
            }
        }
        let centroid = centroid_embedding(&nodes);
        Ok(nodes
            .into_iter()
            .map(|node| {
                let relevance = match (&node.embedding, &centroid) {
                    (Some(embedding), Some(centroid)) => cosine_similarity(embedding, centroid),
                    _ => 0.0,
                };
                HarvestedPassage {
                    source_node_id: node.id,
                    text: node.content,
                    relevance,
                    source_type: node.source_type,
                    source_created_at: node.source_created_at,
                }
            })
            .collect())
    }

    async fn rewrite_chapters(&self, chapters: &mut [Chapter], persona: &PersonaProfile, passes: usize) -> UaosResult<()> {
        let style = self.default_style(persona.id).await?;
        let passes = passes.clamp(1, 3);
        for chapter in chapters.iter_mut() {
            let mut text = chapter.content.clone();
            for _ in 0..passes {
                text = self.rewriter.rewrite(&text, persona, style.as_ref()).await?;
            }
            chapter.content = text;
        }
        Ok(())
    }

    async fn index_book(&self, book: &Book, introduction: Option<&str>) -> UaosResult<()> {
        for chapter in &book.chapters {
            self.index_node(&chapter.content, "book_chapter", book.created_at).await?;
        }
        if let Some(introduction) = introduction {
            self.index_node(introduction, "book_apex", book.created_at).await?;
        }
        Ok(())
    }

    async fn index_node(&self, content: &str, source_type: &str, created_at: Timestamp) -> UaosResult<()> {
        let node = ArchiveNode {
            id: NodeId::now_v7(),
            content: content.to_string(),
            source_type: source_type.to_string(),
            author_role: None,
            word_count: content.split_whitespace().count(),
            source_created_at: Some(created_at),
            embedding: None,
            embedding_model: None,
        };
        self.store.save_node(&node).await?;
        let vector = self.embedder.embed_text(content).await?;
        self.store.store_embedding(node.id, vector, self.embedder.model().to_string()).await?;
        Ok(())
    }

    /// `createBookFromCluster(clusterId, options)` (C12): gather passages,
    /// generate a narrative arc, split into 3-5 chapters, optionally
    /// rewrite in the resolved persona's voice, persist the book, and
    /// optionally index its chapters/introduction into the archive.
    #[instrument(skip(self, options, on_progress))]
    pub async fn create_book_from_cluster(
        &self,
        cluster_id: ClusterId,
        options: &BookOptions,
        mut on_progress: impl FnMut(BookProgress),
    ) -> UaosResult<Book> {
        let cluster = self.store.load_cluster(cluster_id).await?.ok_or_else(|| BookError::NotFound(cluster_id.to_string()))?;

        on_progress(BookProgress { phase: BookPhase::Gathering, detail: format!("{} candidate passages", cluster.passages.len()) });
        let passages = self.gather_passages(&cluster, options.max_passages).await?;

        on_progress(BookProgress { phase: BookPhase::GeneratingArc, detail: format!("{:?}", options.arc_type) });
        let ordered = generate_arc(passages, options.arc_type, cluster_id);

        on_progress(BookProgress { phase: BookPhase::Assembling, detail: format!("{} passages", ordered.len()) });
        let mut chapters = split_chapters(&ordered);

        let persona = self.resolve_persona(options).await?;
        if let Some(persona) = &persona {
            on_progress(BookProgress { phase: BookPhase::PersonaRewriting, detail: persona.name.clone() });
            self.rewrite_chapters(&mut chapters, persona, options.rewrite_passes).await?;
        }

        let introduction = Some(format!("{}: {}", cluster.label, cluster.description));
        let book = Book {
            id: BookId::now_v7(),
            user_id: options.user_id,
            cluster_id: Some(cluster_id),
            persona_id: persona.as_ref().map(|p| p.id),
            title: cluster.label.clone(),
            description: cluster.description.clone(),
            introduction: introduction.clone(),
            chapters,
            created_at: Utc::now(),
            content_hash: None,
        };
        self.store.save_book(&book).await?;

        if options.index_in_archive {
            on_progress(BookProgress { phase: BookPhase::Indexing, detail: format!("{} chapters", book.chapters.len()) });
            self.index_book(&book, introduction.as_deref()).await?;
        }

        on_progress(BookProgress { phase: BookPhase::Complete, detail: book.id.to_string() });
        Ok(book)
    }

    /// `createBookWithPersona`: the same assembly pipeline with an
    /// explicit, required persona rather than the default-persona
    /// fallback.
    pub async fn create_book_with_persona(
        &self,
        cluster_id: ClusterId,
        persona_id: PersonaId,
        options: &BookOptions,
        on_progress: impl FnMut(BookProgress),
    ) -> UaosResult<Book> {
        let mut opts = options.clone();
        opts.persona_id = Some(persona_id);
        self.create_book_from_cluster(cluster_id, &opts, on_progress).await
    }

    /// `harvest({query, limit, minRelevance, dateRange?, excludeIds?,
    /// maxFromSingleSource?})`: embeds the query, pulls a larger-than-`limit`
    /// candidate set from the store so post-filtering still has enough to
    /// work with, applies the exclude list and date range, enforces
    /// per-source caps by bucketing, then re-sorts by relevance and
    /// truncates to `limit`.
    #[instrument(skip(self, query))]
    pub async fn harvest(&self, query: &str, opts: &BookHarvestOptions) -> UaosResult<Vec<HarvestedPassage>> {
        let vector = self.embedder.embed_text(query).await?;
        let fetch_limit = opts.limit.saturating_mul(5).clamp(opts.limit.max(1), 500);
        let matches = self.store.search_by_embedding(&vector, fetch_limit, opts.min_relevance).await?;

        let mut passages = Vec::new();
        for m in matches {
            if opts.exclude_ids.contains(&m.node_id) {
                continue;
            }
            let Some(node) = self.store.get_node(m.node_id).await? else { continue };
            if let Some((since, until)) = opts.date_range {
                match node.source_created_at {
                    Some(ts) if ts >= since && ts <= until => {}
                    _ => continue,
                }
            }
            passages.push(HarvestedPassage {
                source_node_id: node.id,
                text: node.content,
                relevance: m.similarity,
                source_type: node.source_type,
                source_created_at: node.source_created_at,
            });
        }

        if let Some(cap) = opts.max_from_single_source {
            let mut seen: BTreeMap<String, usize> = BTreeMap::new();
            passages.retain(|p| {
                let count = seen.entry(p.source_type.clone()).or_insert(0);
                *count += 1;
                *count <= cap
            });
        }

        passages.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        passages.truncate(opts.limit);
        Ok(passages)
    }
}

// ============================================================================
// EXPORT FORMATS
// ============================================================================

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// `exportBook(format: markdown)`.
pub fn export_markdown(book: &Book) -> String {
    let mut out = format!("# {}\n\n*{}*\n\n", book.title, book.description);
    if let Some(introduction) = &book.introduction {
        out.push_str("## Introduction\n\n");
        out.push_str(introduction);
        out.push_str("\n\n");
    }
    for chapter in &book.chapters {
        out.push_str(&format!("## {}\n\n{}\n\n", chapter.title, chapter.content));
    }
    out.push_str(&format!("---\n\n*Generated by UAOS from {} chapters.*\n", book.chapters.len()));
    out
}

/// Splits `text` on blank lines and wraps each resulting paragraph in a
/// `<p>` element, escaping its content.
fn paragraphs_to_html(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>\n", escape_html(p)))
        .collect()
}

/// `exportBook(format: html)`.
pub fn export_html(book: &Book) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n");
    out.push_str("<html>\n<head>\n");
    out.push_str(&format!("<title>{}</title>\n", escape_html(&book.title)));
    out.push_str("<style>\n");
    out.push_str("body { font-family: Georgia, serif; margin: 40px auto; max-width: 760px; line-height: 1.6; color: #222; }\n");
    out.push_str("h1 { color: #1a1a1a; }\n");
    out.push_str("h2 { color: #333; border-bottom: 1px solid #ddd; padding-bottom: 4px; }\n");
    out.push_str(".description { font-style: italic; color: #555; }\n");
    out.push_str("footer { margin-top: 40px; font-size: 0.85em; color: #888; }\n");
    out.push_str("</style>\n");
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(&book.title)));
    out.push_str(&format!("<p class=\"description\">{}</p>\n", escape_html(&book.description)));
    if let Some(introduction) = &book.introduction {
        out.push_str("<h2>Introduction</h2>\n");
        out.push_str(&paragraphs_to_html(introduction));
    }
    for chapter in &book.chapters {
        out.push_str(&format!("<h2>{}</h2>\n", escape_html(&chapter.title)));
        out.push_str(&paragraphs_to_html(&chapter.content));
    }
    out.push_str(&format!("<footer>Generated by UAOS from {} chapters.</footer>\n", book.chapters.len()));
    out.push_str("</body>\n</html>\n");
    out
}

/// `exportBook(format: json)`.
pub fn export_json(book: &Book) -> UaosResult<String> {
    serde_json::to_string_pretty(book).map_err(|e| BookError::InvalidArgs(format!("failed to serialize book: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaos_adapters::{MockEmbeddingAdapter, TaggingRewriteAdapter};
    use uaos_store::InMemoryStore;
    use uaos_types::SourceDistributionEntry;

    fn assembler() -> (BookAssembler, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(MockEmbeddingAdapter::new("mock-embed-1", 8));
        let rewriter = Arc::new(TaggingRewriteAdapter);
        (BookAssembler::new(store.clone(), embedder, rewriter), store)
    }

    fn node(content: &str, source_type: &str, created_at: Option<Timestamp>) -> ArchiveNode {
        ArchiveNode {
            id: NodeId::now_v7(),
            content: content.to_string(),
            source_type: source_type.to_string(),
            author_role: Some("user".into()),
            word_count: content.split_whitespace().count(),
            source_created_at: created_at,
            embedding: Some(vec![1.0, 0.0]),
            embedding_model: Some("mock-embed-1".into()),
        }
    }

    async fn seeded_cluster(store: &InMemoryStore, passage_count: usize) -> Cluster {
        let mut ids = Vec::new();
        for i in 0..passage_count {
            let n = node(&format!("passage number {i} about onboarding friction today"), "message", None);
            ids.push(n.id);
            store.save_node(&n).await.unwrap();
        }
        let cluster = Cluster {
            id: ClusterId::now_v7(),
            label: "Onboarding friction".into(),
            description: "Recurring onboarding complaints".into(),
            passages: ids,
            total_passages: passage_count,
            coherence: 0.9,
            keywords: vec!["onboarding".into()],
            source_distribution: vec![SourceDistributionEntry { source_type: "message".into(), count: passage_count }],
            date_range: None,
            avg_word_count: 7.0,
        };
        store.save_cluster(&cluster).await.unwrap();
        cluster
    }

    #[tokio::test]
    async fn creates_book_with_three_to_five_chapters() {
        let (assembler, store) = assembler();
        let cluster = seeded_cluster(&store, 23).await;
        let book = assembler
            .create_book_from_cluster(cluster.id, &BookOptions { index_in_archive: false, ..Default::default() }, |_| {})
            .await
            .unwrap();
        assert_eq!(book.chapters.len(), 3);
        assert_eq!(book.cluster_id, Some(cluster.id));
    }

    #[tokio::test]
    async fn persona_rewrite_pass_tags_every_chapter() {
        let (assembler, store) = assembler();
        let cluster = seeded_cluster(&store, 12).await;
        let user = UserId::now_v7();
        let persona = PersonaProfile {
            id: PersonaId::now_v7(),
            user_id: user,
            name: "Ada".into(),
            is_default: true,
            voice_traits: uaos_types::VoiceTraits { traits: Default::default(), tone_markers: vec![], formality_range: None },
            example_text_refs: vec![],
            created_at: Utc::now(),
        };
        store.save_persona(&persona).await.unwrap();

        let book = assembler
            .create_book_from_cluster(
                cluster.id,
                &BookOptions { user_id: Some(user), index_in_archive: false, rewrite_passes: 1, ..Default::default() },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(book.persona_id, Some(persona.id));
        for chapter in &book.chapters {
            assert!(chapter.content.contains("Ada"));
        }
    }

    #[tokio::test]
    async fn indexing_writes_chapter_and_apex_nodes() {
        let (assembler, store) = assembler();
        let cluster = seeded_cluster(&store, 15).await;
        let stats_before = store.archive_stats().await.unwrap();

        let book = assembler.create_book_from_cluster(cluster.id, &BookOptions::default(), |_| {}).await.unwrap();

        let stats_after = store.archive_stats().await.unwrap();
        // One embedded node per chapter, plus one apex node for the introduction.
        assert_eq!(stats_after.embedded_nodes, stats_before.embedded_nodes + book.chapters.len() + 1);
    }

    #[tokio::test]
    async fn chronological_arc_sorts_missing_dates_first() {
        let (assembler, store) = assembler();
        let dated = node("later dated passage about rollout plans", "message", Some(Utc::now()));
        let undated = node("undated passage about rollout plans", "message", None);
        store.save_node(&dated).await.unwrap();
        store.save_node(&undated).await.unwrap();
        let cluster = Cluster {
            id: ClusterId::now_v7(),
            label: "Rollout".into(),
            description: "desc".into(),
            passages: vec![dated.id, undated.id],
            total_passages: 2,
            coherence: 1.0,
            keywords: vec![],
            source_distribution: vec![],
            date_range: None,
            avg_word_count: 5.0,
        };
        store.save_cluster(&cluster).await.unwrap();

        let book = assembler
            .create_book_from_cluster(cluster.id, &BookOptions { index_in_archive: false, ..Default::default() }, |_| {})
            .await
            .unwrap();
        let first_chapter = &book.chapters[0];
        assert_eq!(first_chapter.passage_source_ids[0], undated.id);
    }

    #[test]
    fn export_markdown_contains_title_and_chapter_headings() {
        let book = Book {
            id: BookId::now_v7(),
            user_id: None,
            cluster_id: None,
            persona_id: None,
            title: "Test Book".into(),
            description: "A description".into(),
            introduction: Some("intro text".into()),
            chapters: vec![Chapter {
                id: ChapterId::now_v7(),
                title: "Ch 1".into(),
                content: "first paragraph <here>\n\nsecond paragraph & more".into(),
                passage_source_ids: vec![],
                order: 0,
            }],
            created_at: Utc::now(),
            content_hash: None,
        };
        let markdown = export_markdown(&book);
        assert!(markdown.contains("# Test Book"));
        assert!(markdown.contains("*A description*"));
        assert!(markdown.contains("## Ch 1"));
        assert!(markdown.trim_end().ends_with("*Generated by UAOS from 1 chapters.*"));

        let html = export_html(&book);
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("<html>"));
        assert!(html.contains("<head>"));
        assert!(html.contains("<style>"));
        assert!(html.contains("<body>"));
        assert!(html.contains("<h1>Test Book</h1>"));
        assert!(html.contains("<p class=\"description\">A description</p>"));
        assert!(html.contains("<footer>Generated by UAOS from 1 chapters.</footer>"));
        // the chapter's double-newline-separated paragraphs each become their own <p>,
        // and HTML-sensitive characters are escaped.
        assert!(html.contains("<p>first paragraph &lt;here&gt;</p>"));
        assert!(html.contains("<p>second paragraph &amp; more</p>"));

        let json = export_json(&book).unwrap();
        assert!(json.contains("\"title\""));
    }

    #[tokio::test]
    async fn harvest_enforces_max_from_single_source() {
        let (assembler, store) = assembler();
        for i in 0..5 {
            store.save_node(&node(&format!("repeated topic entry {i}"), "message", None)).await.unwrap();
        }
        for i in 0..5 {
            let n = node(&format!("repeated topic doc {i}"), "document", None);
            store.save_node(&n).await.unwrap();
            store.store_embedding(n.id, vec![1.0, 0.0], "mock-embed-1".into()).await.unwrap();
        }
        // Embed the "message" nodes too (save_node above leaves them un-embedded).
        let pending = store.get_nodes_needing_embeddings(100).await.unwrap();
        for n in pending {
            store.store_embedding(n.id, vec![1.0, 0.0], "mock-embed-1".into()).await.unwrap();
        }

        let opts = BookHarvestOptions { limit: 10, max_from_single_source: Some(2), ..Default::default() };
        let results = assembler.harvest("repeated topic", &opts).await.unwrap();
        let message_count = results.iter().filter(|p| p.source_type == "message").count();
        assert!(message_count <= 2);
    }
}
