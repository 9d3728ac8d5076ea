//! Service façade (C1-C13): the one entry point external callers (an HTTP
//! layer, a TUI, a test harness) drive. Composes every component plane —
//! sessions, versioned buffers, the Tool Executor, the ReAct agent loop, the
//! NL router, admin/cost/tier accounting, the archive embedding driver, the
//! cluster discoverer, the persona harvest FSM, and the book assembler —
//! behind the single `UaosService` struct and owns the one background
//! cleanup sweeper spec.md §9 calls for.
//!
//! Uses a struct-holding-`Arc<T>`-collaborators posture that every request
//! handler would borrow from, without an HTTP layer: `UaosService` is the
//! composition root, not a web server. `SessionToolContext` (this crate's
//! `tool_context` module) plays the role a per-request extractor would play
//! — narrowing the shared state down to what one call is allowed to touch —
//! generalized from "the whole app state" down to "one session's buffers".

mod sweeper;
mod tool_context;

pub use tool_context::SessionToolContext;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::instrument;
use uaos_adapters::{
    AnchorType, EmbeddingAdapter, LlmAdapter, PipelineExecutor, RewriteAdapter, SearchOptions,
    SearchResultItem, SearchService, VoiceAnalyzerAdapter,
};
use uaos_admin::{AdminPlane, CostReport, LimitsCheck, RecordCostArgs, ReportOptions, UsageReport};
use uaos_agent::{AgentRunOptions, CancelFlag};
use uaos_archive::{BatchOutcome, EmbedOptions, EmbedProgress, EmbedResult};
use uaos_book::{BookAssembler, BookHarvestOptions, BookOptions, BookProgress};
use uaos_cluster::{ClusterOptions, DiscoverReport};
use uaos_persona::{ArchiveHarvestOptions, FinalizeArgs, FinalizeOutcome, PersonaPlane};
use uaos_router::{RouteOptions, RouterDeps, RouterResponse};
use uaos_session::SessionManager;
use uaos_store::{ArchiveStats, ArtifactMeta, Store, StoredArtifact};
use uaos_tools::{AlwaysApprove, ApprovalGate, ToolExecutor};
use uaos_types::{
    ArchiveNode, BufferBranch, BufferDiff, BufferError, BufferId, BufferVersion, Book, BookId,
    Cluster, ClusterId, ConfigAuditRecord, EntityIdType, ExportFormat, HarvestId, HarvestedPassage,
    MergeResult, MergeStrategy, NodeId, PersonaHarvest, PersonaId, PromptTemplate,
    Route, SearchSessionId, Session, SessionError, SessionId,
    StyleId, TaskId, UaosConfig, UaosError, UaosResult, UserId,
    UserTier, UserUsage, Value, VersionId, VersionedBuffer,
};

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Every adapter/backend collaborator [`UaosService::new`] needs. Grouped
/// into one struct the same way `uaos-router::RouterDeps` groups its
/// per-call collaborators, but held for the service's whole lifetime rather
/// than borrowed per call.
pub struct ServiceDeps {
    pub store: Arc<dyn Store>,
    pub llm: Arc<dyn LlmAdapter>,
    pub embedder: Arc<dyn EmbeddingAdapter>,
    pub pipeline: Arc<dyn PipelineExecutor>,
    pub search: Arc<dyn SearchService>,
    pub approval: Arc<dyn ApprovalGate>,
    pub voice_analyzer: Arc<dyn VoiceAnalyzerAdapter>,
    pub rewriter: Arc<dyn RewriteAdapter>,
}

impl ServiceDeps {
    /// Convenience constructor for callers that don't need approval gating
    /// beyond the default (approve everything unless a tool is destructive,
    /// in which case deny — see [`AlwaysApprove`]'s sibling `AlwaysDeny`
    /// when a caller wants the opposite default).
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
        pipeline: Arc<dyn PipelineExecutor>,
        search: Arc<dyn SearchService>,
        voice_analyzer: Arc<dyn VoiceAnalyzerAdapter>,
        rewriter: Arc<dyn RewriteAdapter>,
    ) -> Self {
        Self { store, llm, embedder, pipeline, search, approval: Arc::new(AlwaysApprove), voice_analyzer, rewriter }
    }
}

/// Options to [`UaosService::search_to_buffer`].
#[derive(Debug, Clone, Default)]
pub struct SearchToBufferOptions {
    pub limit: Option<usize>,
    pub create: bool,
}

/// The composition root. Every method here is the Rust equivalent of one
/// entry in spec.md §6's service API.
pub struct UaosService {
    config: UaosConfig,
    sessions: Arc<SessionManager>,
    store: Arc<dyn Store>,
    admin: Arc<AdminPlane>,
    persona: Arc<PersonaPlane>,
    books: BookAssembler,
    tools: ToolExecutor,
    llm: Arc<dyn LlmAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
    pipeline: Arc<dyn PipelineExecutor>,
    search: Arc<dyn SearchService>,
    approval: Arc<dyn ApprovalGate>,
    rewriter: Arc<dyn RewriteAdapter>,
    /// Agent tasks are not in `Store`'s data model (spec.md §3 only
    /// persists sessions/buffers/books/clusters/archive/persona/cost data),
    /// so this crate owns them the same way `uaos-admin` owns config/prompt/
    /// tier tables that aren't `Store`-backed either.
    tasks: RwLock<HashMap<TaskId, uaos_types::AgentTask>>,
    sweeper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UaosService {
    pub fn new(deps: ServiceDeps, config: UaosConfig) -> Self {
        let admin = Arc::new(AdminPlane::new(deps.store.clone(), &config));
        let persona = Arc::new(PersonaPlane::new(deps.store.clone(), deps.voice_analyzer.clone(), deps.embedder.clone()));
        let books = BookAssembler::new(deps.store.clone(), deps.embedder.clone(), deps.rewriter.clone());
        Self {
            sessions: Arc::new(SessionManager::new(&config)),
            store: deps.store,
            admin,
            persona,
            books,
            tools: ToolExecutor::with_standard_tools(),
            llm: deps.llm,
            embedder: deps.embedder,
            pipeline: deps.pipeline,
            search: deps.search,
            approval: deps.approval,
            rewriter: deps.rewriter,
            tasks: RwLock::new(HashMap::new()),
            sweeper: std::sync::Mutex::new(None),
            config,
        }
    }

    /// Starts the single background cleanup sweeper. Idempotent: calling it
    /// twice aborts the previous sweep before starting a new one.
    pub fn start(&self) {
        let handle = sweeper::spawn(self.sessions.clone(), self.admin.clone(), self.persona.clone(), self.config.cleanup_interval_ms);
        if let Some(previous) = self.sweeper.lock().expect("sweeper mutex poisoned").replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweeper and clears every in-memory session. Matches
    /// `SessionManager::destroy`'s note that the sweep must be cancelled by
    /// the owner before/after clearing the map.
    pub fn shutdown(&self) -> UaosResult<()> {
        if let Some(handle) = self.sweeper.lock().expect("sweeper mutex poisoned").take() {
            handle.abort();
        }
        self.sessions.destroy()
    }

    fn poisoned(what: &str) -> UaosError {
        UaosError::Internal(format!("{what} lock poisoned"))
    }
}

// ============================================================================
// SESSIONS
// ============================================================================

impl UaosService {
    #[instrument(skip(self))]
    pub fn create_session(&self, user_id: Option<UserId>, name: Option<String>) -> UaosResult<Session> {
        self.sessions.create(user_id, name)
    }

    #[instrument(skip(self))]
    pub fn get_session(&self, id: SessionId) -> UaosResult<Option<Session>> {
        self.sessions.get(id)
    }

    fn require_session(&self, id: SessionId) -> UaosResult<Session> {
        self.sessions.get(id)?.ok_or_else(|| SessionError::NotFound(id.to_string()).into())
    }

    #[instrument(skip(self))]
    pub fn delete_session(&self, id: SessionId) -> UaosResult<()> {
        self.sessions.delete(id)
    }

    #[instrument(skip(self))]
    pub fn list_sessions(&self) -> UaosResult<Vec<Session>> {
        self.sessions.list()
    }
}

// ============================================================================
// NL ENTRY POINTS (dispatch through uaos-router / uaos-agent)
// ============================================================================

impl UaosService {
    fn router_deps<'a>(&'a self, ctx: &'a SessionToolContext<'a>) -> RouterDeps<'a> {
        RouterDeps {
            pipeline: self.pipeline.as_ref(),
            search: self.search.as_ref(),
            llm: self.llm.as_ref(),
            tools: &self.tools,
            tool_ctx: ctx,
            approval: self.approval.as_ref(),
        }
    }

    /// `process(sessionId, request, options?) -> Response` (C6): resolves
    /// pipeline/search/agent intent (or honors an explicit override) and
    /// dispatches. The mutated session (history/counters/buffer state, if
    /// the agent path touched buffers) is re-persisted via
    /// `SessionManager::update` once the async dispatch completes, since the
    /// manager's lock can't be held across the `await`s `process` performs.
    #[instrument(skip(self, agent_opts, cancel), fields(%session_id))]
    pub async fn process(
        &self,
        session_id: SessionId,
        request: &str,
        route: Option<Route>,
        agent_opts: &AgentRunOptions,
        cancel: &CancelFlag,
    ) -> UaosResult<RouterResponse> {
        let mut session = self.require_session(session_id)?;
        let ctx = SessionToolContext::new(self, session_id);
        let deps = self.router_deps(&ctx);
        let response = uaos_router::process(&mut session, request, RouteOptions { route }, &deps, agent_opts, cancel).await;

        if let Some(task) = response.as_ref().ok().and_then(|r| r.task.clone()) {
            self.tasks.write().map_err(|_| Self::poisoned("task map"))?.insert(task.id, task);
        }
        self.sessions.update(session_id, |s| *s = session.clone())?;
        response
    }

    /// `runAgent(sessionId, request, opts?)`: `process` with the agent path
    /// forced, for callers that already know the request isn't pipeline or
    /// search shaped.
    pub async fn run_agent(&self, session_id: SessionId, request: &str, agent_opts: &AgentRunOptions) -> UaosResult<RouterResponse> {
        self.process(session_id, request, Some(Route::Agent), agent_opts, &CancelFlag::new()).await
    }

    /// `executeBql(sessionId, pipelineText)`: `process` with the pipeline
    /// path forced, dry-run-gated the same way the router's keyword-detected
    /// pipeline path is.
    pub async fn execute_bql(&self, session_id: SessionId, pipeline_text: &str) -> UaosResult<RouterResponse> {
        self.process(session_id, pipeline_text, Some(Route::Pipeline), &AgentRunOptions::default(), &CancelFlag::new()).await
    }

    /// `resumeAgent(sessionId, taskId, answer)`: answers a task suspended in
    /// `awaiting_input` by `process`'s agent path, driving it back through
    /// the ReAct loop until it completes, asks again, or exhausts its step
    /// budget.
    #[instrument(skip(self, answer))]
    pub async fn resume_agent(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        answer: impl Into<String> + Send,
        agent_opts: &AgentRunOptions,
    ) -> UaosResult<uaos_types::AgentTask> {
        let mut task = self
            .tasks
            .read()
            .map_err(|_| Self::poisoned("task map"))?
            .get(&task_id)
            .cloned()
            .ok_or_else(|| uaos_types::AgentError::NotFound(task_id.to_string()))?;

        let ctx = SessionToolContext::new(self, session_id);
        uaos_agent::resume(&mut task, answer, self.llm.as_ref(), &self.tools, &ctx, self.approval.as_ref(), agent_opts, &CancelFlag::new()).await?;

        self.tasks.write().map_err(|_| Self::poisoned("task map"))?.insert(task.id, task.clone());
        Ok(task)
    }

    pub fn get_task(&self, task_id: TaskId) -> UaosResult<Option<uaos_types::AgentTask>> {
        Ok(self.tasks.read().map_err(|_| Self::poisoned("task map"))?.get(&task_id).cloned())
    }
}

// ============================================================================
// BUFFERS (C2, direct access outside the NL/tool path)
// ============================================================================

impl UaosService {
    /// Runs `f` against the named buffer inside one `SessionManager::update`
    /// call, so the buffer mutation and the session's `updatedAt` touch
    /// happen atomically. Used by both the direct buffer API below and
    /// `apply_buffer_op` (the Tool Executor's bridge).
    fn update_buffer<T>(&self, session_id: SessionId, buffer_name: &str, f: impl FnOnce(&mut VersionedBuffer) -> Result<T, BufferError> + Send) -> UaosResult<T> {
        self.sessions.update(session_id, move |session| -> UaosResult<T> {
            let buffer = session
                .buffers
                .get_mut(buffer_name)
                .ok_or_else(|| BufferError::NotFound(buffer_name.to_string()))?;
            Ok(f(buffer)?)
        })?
    }

    #[instrument(skip(self, initial_content))]
    pub fn create_buffer(&self, session_id: SessionId, name: &str, initial_content: Vec<Value>) -> UaosResult<VersionedBuffer> {
        self.sessions.update(session_id, move |session| {
            let buffer = uaos_buffer::create_buffer(BufferId::now_v7(), name, initial_content);
            session.active_buffer_name.get_or_insert_with(|| name.to_string());
            session.buffers.insert(name.to_string(), buffer.clone());
            buffer
        })
    }

    pub fn get_buffer(&self, session_id: SessionId, name: &str) -> UaosResult<Option<VersionedBuffer>> {
        Ok(self.require_session(session_id)?.buffers.get(name).cloned())
    }

    pub fn list_buffers(&self, session_id: SessionId) -> UaosResult<Vec<VersionedBuffer>> {
        Ok(self.require_session(session_id)?.buffers.into_values().collect())
    }

    pub fn set_buffer_content(&self, session_id: SessionId, name: &str, content: Vec<Value>) -> UaosResult<()> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::set_working_content(buf, content))
    }

    pub fn append_to_buffer(&self, session_id: SessionId, name: &str, items: Vec<Value>) -> UaosResult<()> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::append_to_buffer(buf, items))
    }

    pub fn commit(&self, session_id: SessionId, name: &str, message: &str) -> UaosResult<BufferVersion> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::commit(buf, message))
    }

    pub fn rollback(&self, session_id: SessionId, name: &str, steps: usize) -> UaosResult<BufferVersion> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::rollback(buf, steps))
    }

    pub fn branch(&self, session_id: SessionId, name: &str, branch_name: &str) -> UaosResult<BufferBranch> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::branch(buf, branch_name))
    }

    pub fn switch_branch(&self, session_id: SessionId, name: &str, branch_name: &str) -> UaosResult<()> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::switch_branch(buf, branch_name))
    }

    pub fn merge(&self, session_id: SessionId, name: &str, source_branch: &str, strategy: MergeStrategy, message: Option<&str>) -> UaosResult<MergeResult> {
        self.update_buffer(session_id, name, move |buf| uaos_buffer::merge(buf, source_branch, strategy, message))
    }

    pub fn diff(&self, session_id: SessionId, name: &str, from: &VersionId, to: &VersionId) -> UaosResult<BufferDiff> {
        let session = self.require_session(session_id)?;
        let buffer = session.buffers.get(name).ok_or_else(|| BufferError::NotFound(name.to_string()))?;
        Ok(uaos_buffer::diff(buffer, from, to)?)
    }

    pub fn get_history(&self, session_id: SessionId, name: &str, limit: Option<usize>) -> UaosResult<Vec<BufferVersion>> {
        let session = self.require_session(session_id)?;
        let buffer = session.buffers.get(name).ok_or_else(|| BufferError::NotFound(name.to_string()))?;
        Ok(uaos_buffer::get_history(buffer, limit)?)
    }

    /// The bridge [`SessionToolContext`] calls for every `buffer_*` tool.
    /// Converts the structured buffer-op result into a [`Value`] via
    /// `Opaque` (the "externally-owned object the core does not interpret"
    /// variant): these are already-serializable domain structs the Tool
    /// Executor has no reason to decompose field-by-field.
    pub(crate) async fn apply_buffer_op(&self, session_id: SessionId, op: uaos_tools::BufferOp) -> UaosResult<Value> {
        use uaos_tools::BufferOp;
        match op {
            BufferOp::SetContent { buffer, content } => {
                self.set_buffer_content(session_id, &buffer, content)?;
                Ok(Value::Null)
            }
            BufferOp::Append { buffer, items } => {
                self.append_to_buffer(session_id, &buffer, items)?;
                Ok(Value::Null)
            }
            BufferOp::Commit { buffer, message } => opaque(self.commit(session_id, &buffer, &message)?),
            BufferOp::Rollback { buffer, steps } => opaque(self.rollback(session_id, &buffer, steps)?),
            BufferOp::Branch { buffer, branch_name } => opaque(self.branch(session_id, &buffer, &branch_name)?),
            BufferOp::SwitchBranch { buffer, branch_name } => {
                self.switch_branch(session_id, &buffer, &branch_name)?;
                Ok(Value::Null)
            }
            BufferOp::Merge { buffer, source_branch, strategy, message } => {
                let strategy = MergeStrategy::from_db_str(&strategy).map_err(|e| BufferError::InvalidArgs(e.to_string()))?;
                opaque(self.merge(session_id, &buffer, &source_branch, strategy, message.as_deref())?)
            }
            BufferOp::Diff { buffer, from, to } => opaque(self.diff(session_id, &buffer, &VersionId(from), &VersionId(to))?),
            BufferOp::GetHistory { buffer, limit } => opaque(self.get_history(session_id, &buffer, limit)?),
        }
    }
}

fn opaque<T: serde::Serialize>(value: T) -> UaosResult<Value> {
    let data = serde_json::to_value(&value).map_err(|e| UaosError::Internal(format!("failed to serialize tool result: {e}")))?;
    Ok(Value::Opaque { kind: std::any::type_name::<T>().to_string(), data })
}

// ============================================================================
// SEARCH (C5, direct access outside the NL/tool path)
// ============================================================================

impl UaosService {
    async fn ensure_search_session(&self, session_id: SessionId) -> UaosResult<SearchSessionId> {
        self.sessions.update(session_id, |session| *session.search_session_id.get_or_insert_with(SearchSessionId::now_v7))
    }

    pub async fn search(&self, session_id: SessionId, query: &str, opts: SearchOptions) -> UaosResult<Vec<SearchResultItem>> {
        let search_session_id = self.ensure_search_session(session_id).await?;
        self.sessions.update(session_id, |s| s.search_count += 1)?;
        self.search.search(search_session_id, query, opts).await
    }

    pub async fn refine(&self, session_id: SessionId, opts: SearchOptions) -> UaosResult<Vec<SearchResultItem>> {
        let search_session_id = self.ensure_search_session(session_id).await?;
        self.search.refine_results(search_session_id, opts).await
    }

    pub async fn add_anchor(&self, session_id: SessionId, result_id: &str, anchor: AnchorType) -> UaosResult<()> {
        let search_session_id = self.ensure_search_session(session_id).await?;
        self.search.add_anchor(search_session_id, result_id, anchor).await
    }

    /// `searchToBuffer(sessionId, bufferName, {limit?, create?})`: pulls the
    /// session's current search result set and appends it (as one `Value`
    /// map per result) to the named buffer, creating it first if
    /// `options.create` is set and it doesn't exist yet.
    #[instrument(skip(self, opts))]
    pub async fn search_to_buffer(&self, session_id: SessionId, buffer_name: &str, opts: SearchToBufferOptions) -> UaosResult<VersionedBuffer> {
        let search_session_id = self.ensure_search_session(session_id).await?;
        let mut results = self.search.get_results(search_session_id).await?;
        if let Some(limit) = opts.limit {
            results.truncate(limit);
        }
        let items: Vec<Value> = results.into_iter().map(search_result_to_value).collect();

        let exists = self.require_session(session_id)?.buffers.contains_key(buffer_name);
        if !exists {
            if !opts.create {
                return Err(BufferError::NotFound(buffer_name.to_string()).into());
            }
            self.create_buffer(session_id, buffer_name, Vec::new())?;
        }
        self.append_to_buffer(session_id, buffer_name, items)?;
        self.get_buffer(session_id, buffer_name)?.ok_or_else(|| BufferError::NotFound(buffer_name.to_string()).into())
    }
}

fn search_result_to_value(item: SearchResultItem) -> Value {
    let mut m = BTreeMap::new();
    m.insert("id".to_string(), Value::String(item.id));
    if let Some(node_id) = item.node_id {
        m.insert("node_id".to_string(), Value::String(node_id.to_string()));
    }
    m.insert("text".to_string(), Value::String(item.text));
    m.insert("score".to_string(), Value::Float(item.score as f64));
    Value::Map(m)
}

// ============================================================================
// ADMIN (C7/C8 passthroughs)
// ============================================================================

impl UaosService {
    pub fn get_config(&self, category: &str, key: &str) -> UaosResult<Option<Value>> {
        self.admin.get(category, key)
    }

    pub fn set_config(&self, category: &str, key: &str, value: Value, reason: Option<String>, changed_by: Option<UserId>) -> UaosResult<()> {
        self.admin.set(category, key, value, reason, changed_by)
    }

    pub fn config_audit_log(&self) -> UaosResult<Vec<ConfigAuditRecord>> {
        self.admin.audit_log()
    }

    pub fn create_prompt(&self, id: impl Into<String>, name: impl Into<String>, template: impl Into<String>) -> UaosResult<PromptTemplate> {
        self.admin.create_prompt(id, name, template)
    }

    pub fn get_prompt(&self, id: &str) -> UaosResult<Option<PromptTemplate>> {
        self.admin.get_prompt(id)
    }

    pub fn update_prompt(&self, id: &str, template: impl Into<String>) -> UaosResult<PromptTemplate> {
        self.admin.update_prompt(id, template)
    }

    pub fn delete_prompt(&self, id: &str) -> UaosResult<()> {
        self.admin.delete_prompt(id)
    }

    pub fn list_prompts(&self) -> UaosResult<Vec<PromptTemplate>> {
        self.admin.list_prompts()
    }

    pub fn compile_prompt(&self, id: &str, vars: &BTreeMap<String, String>) -> UaosResult<String> {
        self.admin.compile(id, vars)
    }

    pub fn test_prompt(&self, id: &str, vars: &BTreeMap<String, String>) -> UaosResult<String> {
        self.admin.test(id, vars)
    }

    pub async fn record_llm_cost(&self, args: RecordCostArgs) -> UaosResult<Option<uaos_types::LlmCostEntry>> {
        self.admin.record_llm_cost(args).await
    }

    pub async fn get_usage(&self, user_id: UserId, period: &str) -> UaosResult<UserUsage> {
        self.admin.get_usage(user_id, period).await
    }

    pub async fn prune_old_cost_entries(&self) -> UaosResult<usize> {
        self.admin.prune_old_cost_entries().await
    }

    pub fn list_tiers(&self) -> UaosResult<Vec<UserTier>> {
        self.admin.list_tiers()
    }

    pub fn get_tier(&self, id: &str) -> UaosResult<Option<UserTier>> {
        self.admin.get_tier(id)
    }

    pub fn set_tier(&self, tier: UserTier) -> UaosResult<()> {
        self.admin.set_tier(tier)
    }

    pub fn delete_tier(&self, id: &str) -> UaosResult<()> {
        self.admin.delete_tier(id)
    }

    pub fn set_user_tier(&self, user_id: UserId, tier_id: &str) -> UaosResult<()> {
        self.admin.set_user_tier(user_id, tier_id)
    }

    pub fn is_model_allowed(&self, tier_id: &str, model: &str) -> UaosResult<bool> {
        self.admin.is_model_allowed(tier_id, model)
    }

    pub async fn check_limits(&self, user_id: UserId, active_tasks: i64) -> UaosResult<LimitsCheck> {
        self.admin.check_limits(user_id, active_tasks).await
    }

    pub async fn get_cost_report(&self, opts: ReportOptions) -> UaosResult<CostReport> {
        self.admin.get_cost_report(opts).await
    }

    pub async fn get_usage_report(&self, opts: ReportOptions) -> UaosResult<UsageReport> {
        self.admin.get_usage_report(opts).await
    }
}

// ============================================================================
// ARCHIVE / CLUSTERS / BOOKS (C9/C10/C12)
// ============================================================================

impl UaosService {
    pub async fn get_archive_stats(&self) -> UaosResult<ArchiveStats> {
        self.store.archive_stats().await
    }

    pub async fn embed_all(&self, options: &EmbedOptions, on_progress: impl FnMut(EmbedProgress)) -> UaosResult<EmbedResult> {
        uaos_archive::embed_all(self.store.as_ref(), self.embedder.as_ref(), options, None, on_progress).await
    }

    pub async fn embed_batch(&self, nodes: &[ArchiveNode]) -> BatchOutcome {
        let refs: Vec<&ArchiveNode> = nodes.iter().collect();
        uaos_archive::embed_batch(&refs, self.store.as_ref(), self.embedder.as_ref()).await
    }

    pub async fn discover_clusters(&self, options: &ClusterOptions) -> UaosResult<DiscoverReport> {
        uaos_cluster::discover_clusters(self.store.as_ref(), options).await
    }

    pub async fn list_clusters(&self) -> UaosResult<Vec<Cluster>> {
        self.store.list_clusters().await
    }

    pub async fn get_cluster(&self, id: ClusterId) -> UaosResult<Option<Cluster>> {
        self.store.load_cluster(id).await
    }

    pub async fn save_cluster(&self, cluster: &Cluster) -> UaosResult<()> {
        self.store.save_cluster(cluster).await
    }

    pub async fn create_book_from_cluster(&self, cluster_id: ClusterId, options: &BookOptions, on_progress: impl FnMut(BookProgress)) -> UaosResult<Book> {
        self.books.create_book_from_cluster(cluster_id, options, on_progress).await
    }

    pub async fn create_book_with_persona(&self, cluster_id: ClusterId, persona_id: PersonaId, options: &BookOptions, on_progress: impl FnMut(BookProgress)) -> UaosResult<Book> {
        self.books.create_book_with_persona(cluster_id, persona_id, options, on_progress).await
    }

    pub async fn harvest_passages(&self, query: &str, opts: &BookHarvestOptions) -> UaosResult<Vec<HarvestedPassage>> {
        self.books.harvest(query, opts).await
    }

    pub async fn list_books(&self, user_id: Option<UserId>) -> UaosResult<Vec<Book>> {
        self.store.list_books(user_id).await
    }

    pub async fn get_book(&self, id: BookId) -> UaosResult<Option<Book>> {
        self.store.load_book(id).await
    }

    /// `exportBook(id, format)`: renders the book through `uaos-book`'s
    /// exporter for `format`, wraps it as a [`StoredArtifact`], and persists
    /// it so `downloadArtifact`/`listArtifacts` can retrieve it afterward.
    #[instrument(skip(self))]
    pub async fn export_book(&self, id: BookId, format: ExportFormat) -> UaosResult<StoredArtifact> {
        let book = self.store.load_book(id).await?.ok_or_else(|| uaos_types::BookError::NotFound(id.to_string()))?;
        let (bytes, content_type) = match format {
            ExportFormat::Markdown => (uaos_book::export_markdown(&book).into_bytes(), "text/markdown"),
            ExportFormat::Html => (uaos_book::export_html(&book).into_bytes(), "text/html"),
            ExportFormat::Json => (uaos_book::export_json(&book)?.into_bytes(), "application/json"),
        };
        let artifact = StoredArtifact {
            id: uaos_types::ArtifactId::now_v7().to_string(),
            name: format!("{}.{}", book.title, format.as_db_str()),
            content_type: content_type.to_string(),
            bytes,
            created_at: chrono::Utc::now(),
        };
        self.store.save_artifact(artifact.clone()).await?;
        Ok(artifact)
    }

    pub async fn download_artifact(&self, id: &str) -> UaosResult<Option<StoredArtifact>> {
        self.store.load_artifact(id).await
    }

    pub async fn list_artifacts(&self) -> UaosResult<Vec<ArtifactMeta>> {
        self.store.list_artifacts().await
    }
}

// ============================================================================
// PERSONA HARVEST (C11)
// ============================================================================

impl UaosService {
    pub async fn start_persona_harvest(&self, user_id: UserId, name: String) -> UaosResult<PersonaHarvest> {
        self.persona.start_harvest(user_id, name).await
    }

    pub async fn add_persona_sample(&self, id: HarvestId, text: String, source_node_id: Option<NodeId>, relevance: Option<f32>) -> UaosResult<PersonaHarvest> {
        self.persona.add_sample(id, text, source_node_id, relevance).await
    }

    pub async fn harvest_persona_from_archive(&self, id: HarvestId, query: &str, opts: &ArchiveHarvestOptions) -> UaosResult<PersonaHarvest> {
        self.persona.harvest_from_archive(id, query, opts).await
    }

    pub async fn extract_persona_traits(&self, id: HarvestId) -> UaosResult<PersonaHarvest> {
        self.persona.extract_traits(id).await
    }

    pub async fn finalize_persona(&self, id: HarvestId, args: FinalizeArgs) -> UaosResult<FinalizeOutcome> {
        self.persona.finalize_persona(id, args).await
    }

    pub async fn prune_expired_persona_harvests(&self, user_id: Option<UserId>) -> UaosResult<usize> {
        self.persona.prune_expired_harvests(user_id).await
    }

    /// `generatePersonaSample(personaId, styleId?, seedText?) -> String`:
    /// not part of the harvest FSM proper (spec.md §4.11 only names it
    /// alongside the FSM operations, without describing an algorithm for
    /// it) — implemented here as a thin rewrite-adapter call, the same
    /// collaborator `uaos-book`'s chapter rewrite pass already uses, over a
    /// generic seed prompt when the caller doesn't supply one. Loads the
    /// persona (and style, if named) from the store so callers only need
    /// ids, matching every other `*_id`-keyed lookup in this façade.
    #[instrument(skip(self, seed_text))]
    pub async fn generate_persona_sample(&self, persona_id: PersonaId, style_id: Option<StyleId>, seed_text: Option<&str>) -> UaosResult<String> {
        let persona = self
            .store
            .load_persona(persona_id)
            .await?
            .ok_or_else(|| uaos_types::PersonaError::NotFound(persona_id.to_string()))?;
        let style = match style_id {
            Some(id) => Some(self.store.load_style(id).await?.ok_or_else(|| uaos_types::PersonaError::NotFound(id.to_string()))?),
            None => None,
        };
        let seed = seed_text.unwrap_or("Write a short paragraph in this voice about an ordinary morning.");
        self.rewriter.rewrite(seed, &persona, style.as_ref()).await
    }
}
