//! Free-text intent detection and dispatch (C6): maps a request string to
//! `{pipeline, search, agent}`, honors an explicit route override, and runs
//! the pipeline path dry-run-first.
//!
//! Uses a "parse before execute" discipline (separating a parse/validate
//! pass from execution) generalized into the dry-run-then-execute gate
//! described here, plus a message-routing-by-keyword intent classifier.

use tracing::instrument;
use uaos_adapters::{LlmAdapter, PipelineExecutor, SearchOptions, SearchService};
use uaos_agent::{AgentRunOptions, CancelFlag};
use uaos_tools::{ApprovalGate, ToolContext, ToolExecutor};
use uaos_types::{AgentTask, Route, RouterError, SearchSessionId, Session, UaosResult, Value};

const PIPELINE_KEYWORDS: &[&str] = &["harvest", "load", "transform", "save", "filter", "select", "|"];
const SEARCH_KEYWORDS: &[&str] = &["find", "search", "look for", "where", "containing"];

/// Caller-supplied route override (`options.route` in the service API).
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOptions {
    pub route: Option<Route>,
}

/// What `process` dispatched to and produced.
#[derive(Debug, Clone)]
pub struct RouterResponse {
    pub route: Route,
    pub data: Value,
    pub task: Option<AgentTask>,
}

/// Every collaborator the router may dispatch to. Held by reference so the
/// caller owns the adapters' lifetimes (typically `uaos-service`).
pub struct RouterDeps<'a> {
    pub pipeline: &'a dyn PipelineExecutor,
    pub search: &'a dyn SearchService,
    pub llm: &'a dyn LlmAdapter,
    pub tools: &'a ToolExecutor,
    pub tool_ctx: &'a dyn ToolContext,
    pub approval: &'a dyn ApprovalGate,
}

/// Inspects `request` for pipeline- or search-shaped language; anything else
/// is routed to the agent. Pure and side-effect free so callers and tests
/// can probe classification without standing up adapters.
pub fn detect_intent(request: &str) -> Route {
    let lower = request.to_lowercase();
    if PIPELINE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        Route::Pipeline
    } else if SEARCH_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        Route::Search
    } else {
        Route::Agent
    }
}

/// `process(session, request, options) -> Response` (C6). Resolves a route
/// (honoring `options.route` if set), dispatches, and updates the session's
/// `commandHistory` and counters on every path.
#[instrument(skip(session, deps, agent_opts, cancel), fields(session_id = %session.id))]
pub async fn process(
    session: &mut Session,
    request: &str,
    options: RouteOptions,
    deps: &RouterDeps<'_>,
    agent_opts: &AgentRunOptions,
    cancel: &CancelFlag,
) -> UaosResult<RouterResponse> {
    let route = options.route.unwrap_or_else(|| detect_intent(request));
    session.command_history.push(request.to_string());
    session.command_count += 1;

    let response = match route {
        Route::Pipeline => run_pipeline(request, deps).await?,
        Route::Search => run_search(session, request, deps).await?,
        Route::Agent => run_agent(session, request, deps, agent_opts, cancel).await?,
    };

    Ok(response)
}

async fn run_pipeline(request: &str, deps: &RouterDeps<'_>) -> UaosResult<RouterResponse> {
    let dry = deps.pipeline.execute(request, true).await?;
    if let Some(err) = dry.error {
        return Err(RouterError::NoHandler(format!(
            "pipeline request could not be parsed ({err}); verify the pipeline adapter configuration"
        ))
        .into());
    }
    let outcome = deps.pipeline.execute(request, false).await?;
    match outcome.error {
        Some(err) => Err(RouterError::NoHandler(err).into()),
        None => Ok(RouterResponse { route: Route::Pipeline, data: outcome.data.unwrap_or(Value::Null), task: None }),
    }
}

async fn run_search(session: &mut Session, request: &str, deps: &RouterDeps<'_>) -> UaosResult<RouterResponse> {
    let search_session_id = *session.search_session_id.get_or_insert_with(SearchSessionId::now_v7);
    let results = deps.search.search(search_session_id, request, SearchOptions::default()).await?;
    session.search_count += 1;
    let data = Value::List(
        results
            .into_iter()
            .map(|r| {
                let mut m = std::collections::BTreeMap::new();
                m.insert("id".to_string(), Value::String(r.id));
                m.insert("text".to_string(), Value::String(r.text));
                m.insert("score".to_string(), Value::Float(r.score as f64));
                Value::Map(m)
            })
            .collect(),
    );
    Ok(RouterResponse { route: Route::Search, data, task: None })
}

async fn run_agent(
    session: &mut Session,
    request: &str,
    deps: &RouterDeps<'_>,
    agent_opts: &AgentRunOptions,
    cancel: &CancelFlag,
) -> UaosResult<RouterResponse> {
    let mut task = uaos_agent::new_task(session.id, request);
    uaos_agent::run(&mut task, deps.llm, deps.tools, deps.tool_ctx, deps.approval, agent_opts, cancel).await?;
    session.current_task = Some(task.id);
    session.task_history.push(task.id);
    session.task_count += 1;
    let data = task.result.clone().map(Value::String).unwrap_or(Value::Null);
    Ok(RouterResponse { route: Route::Agent, data, task: Some(task) })
}
