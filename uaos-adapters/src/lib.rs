//! Adapter interfaces the UAOS core consumes: LLM reasoning, embeddings, the
//! pipeline executor, and the search service, plus in-memory mocks for tests.
//!
//! Uses an `#[async_trait]` provider-agnostic pattern (`Send + Sync`
//! implementations) and a deterministic byte-hash embedding generator for
//! the mock, generalized to four boundary-crossing adapter shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use uaos_types::{
    AgentError, ArchiveError, BookError, NextAction, PersonaError, PersonaProfile, RouterError,
    SearchSessionId, StyleProfile, ToolError, UaosResult, Value, VoiceTraits,
};

// ============================================================================
// LLM ADAPTER
// ============================================================================

/// Parameters for a single reasoning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Result of a single LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: i64,
    pub cost_cents: Option<f64>,
}

/// The agent loop's reasoning step result: what to do next, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub next_action: NextAction,
    pub reasoning: String,
    pub tool_call: Option<uaos_types::ToolCall>,
    pub answer: Option<String>,
    pub question: Option<String>,
    pub confidence: Option<f32>,
    pub tokens: LlmResponse,
}

/// Single-call LLM reasoning adapter consumed by the Agent Loop (C5).
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> UaosResult<LlmResponse>;

    /// Ask the model to decide the next ReAct step given the running
    /// transcript. Default implementation calls [`complete`](Self::complete)
    /// and expects the adapter to return its decision JSON-encoded in the
    /// response text; concrete adapters may override this directly.
    async fn reason(&self, request: LlmRequest) -> UaosResult<ReasoningResult>;
}

// ============================================================================
// EMBEDDING ADAPTER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeText {
    pub id: uaos_types::NodeId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEmbedding {
    pub node_id: uaos_types::NodeId,
    pub embedding: Vec<f32>,
}

/// Batch/single embedding adapter consumed by the Archive/Embedding Driver
/// (C9) and the Book Assembler (C12).
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    async fn embed_nodes(&self, nodes: &[NodeText]) -> UaosResult<Vec<NodeEmbedding>>;
    async fn embed_text(&self, text: &str) -> UaosResult<Vec<f32>>;
    fn model(&self) -> &str;
}

// ============================================================================
// VOICE ANALYZER ADAPTER
// ============================================================================

/// Voice-trait extraction adapter consumed by the Persona Harvest FSM
/// (C11)'s `extractTraits` transition. The analysis algorithm itself is an
/// external collaborator's responsibility; this crate only defines the
/// boundary it's called across.
#[async_trait]
pub trait VoiceAnalyzerAdapter: Send + Sync {
    async fn analyze(&self, samples: &[String]) -> UaosResult<VoiceTraits>;
}

// ============================================================================
// REWRITE (BUILDER) ADAPTER
// ============================================================================

/// Persona-voice rewrite adapter consumed by the Book Assembler (C12)'s
/// chapter rewrite pass.
#[async_trait]
pub trait RewriteAdapter: Send + Sync {
    async fn rewrite(&self, text: &str, persona: &PersonaProfile, style: Option<&StyleProfile>) -> UaosResult<String>;
}

// ============================================================================
// PIPELINE EXECUTOR (BQL)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl PipelineOutcome {
    pub fn ok(data: Value) -> Self {
        Self { data: Some(data), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { data: None, error: Some(message.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// External BQL pipeline executor: a textual pipeline language parsed and
/// executed outside this core, which only routes and frames it.
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Parse (and execute) `pipeline_text`. `dry_run` requests a parse-only
    /// check with no side effects; the router's dry-run-then-execute path
    /// relies on this to validate before committing.
    async fn execute(&self, pipeline_text: &str, dry_run: bool) -> UaosResult<PipelineOutcome>;
}

// ============================================================================
// SEARCH SERVICE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub filters: BTreeMap<String, Value>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { limit: None, filters: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub id: String,
    pub node_id: Option<uaos_types::NodeId>,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorType {
    Include,
    Exclude,
    Pin,
}

/// Session-scoped search service: search, refine, anchor management, and
/// result retrieval by session.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(
        &self,
        session_id: SearchSessionId,
        query: &str,
        opts: SearchOptions,
    ) -> UaosResult<Vec<SearchResultItem>>;
    async fn refine_results(
        &self,
        session_id: SearchSessionId,
        opts: SearchOptions,
    ) -> UaosResult<Vec<SearchResultItem>>;
    async fn add_anchor(
        &self,
        session_id: SearchSessionId,
        result_id: &str,
        anchor_type: AnchorType,
    ) -> UaosResult<()>;
    async fn get_results(&self, session_id: SearchSessionId) -> UaosResult<Vec<SearchResultItem>>;
}

// ============================================================================
// MOCKS
// ============================================================================

/// Deterministic byte-hash embedding generator: sum byte values into a
/// fixed-dimension vector round-robin, then L2-normalize.
#[derive(Debug, Clone)]
pub struct MockEmbeddingAdapter {
    model_id: String,
    dimensions: usize,
}

impl MockEmbeddingAdapter {
    pub fn new(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self { model_id: model_id.into(), dimensions }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut data = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            let idx = i % self.dimensions;
            data[idx] += (byte as f32) / 255.0;
        }
        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }
        data
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbeddingAdapter {
    async fn embed_nodes(&self, nodes: &[NodeText]) -> UaosResult<Vec<NodeEmbedding>> {
        Ok(nodes
            .iter()
            .map(|n| NodeEmbedding { node_id: n.id, embedding: self.vectorize(&n.text) })
            .collect())
    }

    async fn embed_text(&self, text: &str) -> UaosResult<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn model(&self) -> &str {
        &self.model_id
    }
}

/// Voice analyzer stub returning a fixed [`VoiceTraits`] regardless of the
/// samples given, or failing when a sample contains a configured marker.
pub struct StaticVoiceAnalyzerAdapter {
    traits: VoiceTraits,
    fail_marker: Option<String>,
}

impl StaticVoiceAnalyzerAdapter {
    pub fn new(traits: VoiceTraits) -> Self {
        Self { traits, fail_marker: None }
    }

    pub fn with_fail_marker(traits: VoiceTraits, marker: impl Into<String>) -> Self {
        Self { traits, fail_marker: Some(marker.into()) }
    }
}

#[async_trait]
impl VoiceAnalyzerAdapter for StaticVoiceAnalyzerAdapter {
    async fn analyze(&self, samples: &[String]) -> UaosResult<VoiceTraits> {
        if let Some(marker) = &self.fail_marker {
            if samples.iter().any(|s| s.contains(marker.as_str())) {
                return Err(PersonaError::AdapterFailure(format!("sample contained marker {marker:?}")).into());
            }
        }
        Ok(self.traits.clone())
    }
}

/// Rewrite adapter stub: appends a persona/style-tagged marker to the input
/// text rather than performing any real rewriting, so tests can assert the
/// pass ran without depending on adapter content.
pub struct TaggingRewriteAdapter;

#[async_trait]
impl RewriteAdapter for TaggingRewriteAdapter {
    async fn rewrite(&self, text: &str, persona: &PersonaProfile, style: Option<&StyleProfile>) -> UaosResult<String> {
        match style {
            Some(style) => Ok(format!("{text} [voice:{}/{}]", persona.name, style.name)),
            None => Ok(format!("{text} [voice:{}]", persona.name)),
        }
    }
}

/// Converts a failed rewrite call into the common taxonomy.
pub fn rewrite_failure(message: impl Into<String>) -> uaos_types::UaosError {
    BookError::AdapterFailure(message.into()).into()
}

/// Scripted LLM adapter for deterministic agent-loop tests: returns queued
/// [`ReasoningResult`]s in order, failing with `AdapterFailure` once
/// exhausted.
pub struct ScriptedLlmAdapter {
    queue: Mutex<VecDeque<ReasoningResult>>,
}

impl ScriptedLlmAdapter {
    pub fn new(script: impl IntoIterator<Item = ReasoningResult>) -> Self {
        Self { queue: Mutex::new(script.into_iter().collect()) }
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlmAdapter {
    async fn complete(&self, request: LlmRequest) -> UaosResult<LlmResponse> {
        Ok(LlmResponse {
            text: request.user_prompt,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            cost_cents: Some(0.0),
        })
    }

    async fn reason(&self, _request: LlmRequest) -> UaosResult<ReasoningResult> {
        let mut queue = self.queue.lock().expect("scripted llm queue poisoned");
        queue
            .pop_front()
            .ok_or_else(|| AgentError::AdapterFailure("scripted LLM adapter exhausted".to_string()).into())
    }
}

/// Pipeline executor stub returning a fixed outcome regardless of input,
/// or echoing an error for pipelines containing a configured failure marker.
pub struct StaticPipelineExecutor {
    outcome: PipelineOutcome,
    fail_marker: Option<String>,
}

impl StaticPipelineExecutor {
    pub fn new(outcome: PipelineOutcome) -> Self {
        Self { outcome, fail_marker: None }
    }

    pub fn with_fail_marker(outcome: PipelineOutcome, marker: impl Into<String>) -> Self {
        Self { outcome, fail_marker: Some(marker.into()) }
    }
}

#[async_trait]
impl PipelineExecutor for StaticPipelineExecutor {
    async fn execute(&self, pipeline_text: &str, _dry_run: bool) -> UaosResult<PipelineOutcome> {
        if let Some(marker) = &self.fail_marker {
            if pipeline_text.contains(marker.as_str()) {
                return Ok(PipelineOutcome::err(format!("failed to parse pipeline: {pipeline_text}")));
            }
        }
        Ok(self.outcome.clone())
    }
}

/// In-memory search service stub returning a fixed result set for every
/// query, tracking per-session anchors and the last query's results for
/// `get_results`/`refine_results`.
pub struct StaticSearchService {
    results: Vec<SearchResultItem>,
    sessions: Mutex<HashMap<SearchSessionId, Vec<SearchResultItem>>>,
}

impl StaticSearchService {
    pub fn new(results: Vec<SearchResultItem>) -> Self {
        Self { results, sessions: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl SearchService for StaticSearchService {
    async fn search(
        &self,
        session_id: SearchSessionId,
        _query: &str,
        opts: SearchOptions,
    ) -> UaosResult<Vec<SearchResultItem>> {
        let mut results = self.results.clone();
        if let Some(limit) = opts.limit {
            results.truncate(limit);
        }
        self.sessions
            .lock()
            .map_err(|_| uaos_types::UaosError::Internal("search session map poisoned".to_string()))?
            .insert(session_id, results.clone());
        Ok(results)
    }

    async fn refine_results(
        &self,
        session_id: SearchSessionId,
        opts: SearchOptions,
    ) -> UaosResult<Vec<SearchResultItem>> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|_| uaos_types::UaosError::Internal("search session map poisoned".to_string()))?;
        let current = guard.get(&session_id).cloned().unwrap_or_default();
        let mut refined = current;
        if let Some(limit) = opts.limit {
            refined.truncate(limit);
        }
        guard.insert(session_id, refined.clone());
        Ok(refined)
    }

    async fn add_anchor(
        &self,
        session_id: SearchSessionId,
        _result_id: &str,
        _anchor_type: AnchorType,
    ) -> UaosResult<()> {
        let guard = self
            .sessions
            .lock()
            .map_err(|_| uaos_types::UaosError::Internal("search session map poisoned".to_string()))?;
        if !guard.contains_key(&session_id) {
            return Err(RouterError::NoHandler(format!("no search session {session_id}")).into());
        }
        Ok(())
    }

    async fn get_results(&self, session_id: SearchSessionId) -> UaosResult<Vec<SearchResultItem>> {
        let guard = self
            .sessions
            .lock()
            .map_err(|_| uaos_types::UaosError::Internal("search session map poisoned".to_string()))?;
        Ok(guard.get(&session_id).cloned().unwrap_or_default())
    }
}

/// Converts a tool/archive adapter-facing error into the common taxonomy
/// when an embedding call fails inside C9/C12 code paths.
pub fn embedding_failure(message: impl Into<String>) -> uaos_types::UaosError {
    ArchiveError::AdapterFailure(message.into()).into()
}

/// Converts a failed tool invocation into the common taxonomy.
pub fn tool_failure(message: impl Into<String>) -> uaos_types::UaosError {
    ToolError::AdapterFailure(message.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaos_types::identity::EntityIdType;
    use uaos_types::NodeId;

    #[tokio::test]
    async fn mock_embedding_is_deterministic_and_normalized() {
        let adapter = MockEmbeddingAdapter::new("mock-embed-1", 8);
        let a = adapter.embed_text("hello world").await.unwrap();
        let b = adapter.embed_text("hello world").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5 || norm == 0.0);
    }

    #[tokio::test]
    async fn mock_embedding_batches_nodes() {
        let adapter = MockEmbeddingAdapter::new("mock-embed-1", 4);
        let nodes = vec![
            NodeText { id: NodeId::now_v7(), text: "a".into() },
            NodeText { id: NodeId::now_v7(), text: "b".into() },
        ];
        let embedded = adapter.embed_nodes(&nodes).await.unwrap();
        assert_eq!(embedded.len(), 2);
    }

    #[tokio::test]
    async fn tagging_rewrite_adapter_appends_voice_marker() {
        let persona = PersonaProfile {
            id: uaos_types::PersonaId::now_v7(),
            user_id: uaos_types::UserId::now_v7(),
            name: "Ada".into(),
            is_default: true,
            voice_traits: VoiceTraits { traits: Default::default(), tone_markers: vec![], formality_range: None },
            example_text_refs: vec![],
            created_at: chrono::Utc::now(),
        };
        let adapter = TaggingRewriteAdapter;
        let rewritten = adapter.rewrite("original text", &persona, None).await.unwrap();
        assert!(rewritten.contains("Ada"));
    }

    #[tokio::test]
    async fn voice_analyzer_fails_on_configured_marker() {
        let traits = VoiceTraits { traits: Default::default(), tone_markers: vec!["wry".into()], formality_range: Some((0.2, 0.6)) };
        let adapter = StaticVoiceAnalyzerAdapter::with_fail_marker(traits, "REDACTED");
        assert!(adapter.analyze(&["fine".to_string()]).await.is_ok());
        assert!(adapter.analyze(&["has REDACTED content".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn scripted_llm_returns_in_order_then_fails() {
        let script = vec![ReasoningResult {
            next_action: NextAction::Complete,
            reasoning: "done".into(),
            tool_call: None,
            answer: Some("ok".into()),
            question: None,
            confidence: Some(0.9),
            tokens: LlmResponse { text: String::new(), input_tokens: 1, output_tokens: 1, latency_ms: 1, cost_cents: None },
        }];
        let adapter = ScriptedLlmAdapter::new(script);
        let req = LlmRequest {
            system_prompt: "sys".into(),
            user_prompt: "usr".into(),
            model: "m".into(),
            temperature: 0.0,
            max_tokens: 10,
        };
        let first = adapter.reason(req.clone()).await.unwrap();
        assert_eq!(first.answer.as_deref(), Some("ok"));
        assert!(adapter.reason(req).await.is_err());
    }

    #[tokio::test]
    async fn static_pipeline_executor_honors_fail_marker() {
        let exec = StaticPipelineExecutor::with_fail_marker(PipelineOutcome::ok(Value::Null), "BADPIPE");
        let bad = exec.execute("harvest | BADPIPE", false).await.unwrap();
        assert!(!bad.is_ok());
        let good = exec.execute("harvest | load", false).await.unwrap();
        assert!(good.is_ok());
    }

    #[tokio::test]
    async fn static_search_service_tracks_session_results() {
        let svc = StaticSearchService::new(vec![SearchResultItem {
            id: "r1".into(),
            node_id: None,
            text: "hit".into(),
            score: 0.9,
        }]);
        let sid = SearchSessionId::now_v7();
        let results = svc.search(sid, "q", SearchOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        let fetched = svc.get_results(sid).await.unwrap();
        assert_eq!(fetched.len(), 1);
        svc.add_anchor(sid, "r1", AnchorType::Pin).await.unwrap();
    }
}
