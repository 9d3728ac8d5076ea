//! Tool registry and dispatch (C4): arg validation, approval gating, timing,
//! and the standard tool set (`bql_execute`, `buffer_*`, `search`).
//!
//! Uses a provider-adapter dispatch shape (capability-tagged handlers)
//! generalized to a name-keyed registry, with a validate-gate-run-time
//! four-step `execute` algorithm. The executor itself is decoupled from
//! session/buffer storage: callers hand it a [`ToolContext`] implementation
//! (owned by `uaos-service`, which has mutable access to the session's
//! buffers) so this crate doesn't need to depend on `uaos-session`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;
use uaos_adapters::{PipelineOutcome, SearchOptions, SearchResultItem};
use uaos_types::{ToolCall, ToolError, ToolResult, UaosResult, Value};

// ============================================================================
// TOOL CONTEXT — the surface handlers operate against
// ============================================================================

/// Describes one buffer mutation a standard `buffer_*` tool wants performed
/// against the calling session's active (or named) buffer.
#[derive(Debug, Clone)]
pub enum BufferOp {
    SetContent { buffer: String, content: Vec<Value> },
    Append { buffer: String, items: Vec<Value> },
    Commit { buffer: String, message: String },
    Rollback { buffer: String, steps: usize },
    Branch { buffer: String, branch_name: String },
    SwitchBranch { buffer: String, branch_name: String },
    Merge { buffer: String, source_branch: String, strategy: String, message: Option<String> },
    Diff { buffer: String, from: String, to: String },
    GetHistory { buffer: String, limit: Option<usize> },
}

/// The environment a tool handler executes against: pipeline/search adapters
/// plus the calling session's buffer store. Implemented by `uaos-service`.
#[async_trait]
pub trait ToolContext: Send + Sync {
    async fn run_pipeline(&self, pipeline: &str, dry_run: bool) -> UaosResult<PipelineOutcome>;
    async fn run_search(&self, query: &str, opts: SearchOptions) -> UaosResult<Vec<SearchResultItem>>;
    async fn buffer_op(&self, op: BufferOp) -> UaosResult<Value>;
}

// ============================================================================
// APPROVAL GATE
// ============================================================================

/// Callback the Tool Executor consults before running a destructive,
/// approval-required tool when `auto_approve` is false.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(&self, call: &ToolCall) -> bool;
}

/// Approves everything. Used when the caller passes `auto_approve: true`
/// or in tests that do not exercise gating.
pub struct AlwaysApprove;

#[async_trait]
impl ApprovalGate for AlwaysApprove {
    async fn request_approval(&self, _call: &ToolCall) -> bool {
        true
    }
}

/// Denies everything; useful for testing the `ApprovalDenied` path.
pub struct AlwaysDeny;

#[async_trait]
impl ApprovalGate for AlwaysDeny {
    async fn request_approval(&self, _call: &ToolCall) -> bool {
        false
    }
}

// ============================================================================
// TOOL DEFINITION + HANDLER
// ============================================================================

/// Declares a tool's argument contract, destructiveness, and approval
/// requirement.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: String,
    pub required_args: Vec<String>,
    pub destructive: bool,
    pub requires_approval: bool,
}

impl ToolDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), required_args: Vec::new(), destructive: false, requires_approval: false }
    }

    pub fn requiring(mut self, args: impl IntoIterator<Item = &'static str>) -> Self {
        self.required_args = args.into_iter().map(String::from).collect();
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self.requires_approval = true;
        self
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value>;
}

struct ToolEntry {
    def: ToolDef,
    handler: Arc<dyn ToolHandler>,
}

// ============================================================================
// TOOL EXECUTOR
// ============================================================================

/// A registry mapping tool name to handler, dispatching with arg validation,
/// approval gating, and timing.
pub struct ToolExecutor {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolExecutor {
    /// Registry with the standard tool set pre-registered: `bql_execute`,
    /// `search`, and the `buffer_*` family.
    pub fn with_standard_tools() -> Self {
        let mut exec = Self { tools: BTreeMap::new() };
        exec.register(
            ToolDef::new("bql_execute").requiring(["pipeline"]),
            Arc::new(BqlExecuteHandler),
        );
        exec.register(ToolDef::new("search").requiring(["query"]), Arc::new(SearchHandler));
        exec.register(
            ToolDef::new("buffer_set_content").requiring(["buffer", "content"]),
            Arc::new(BufferSetContentHandler),
        );
        exec.register(
            ToolDef::new("buffer_append").requiring(["buffer", "items"]),
            Arc::new(BufferAppendHandler),
        );
        exec.register(
            ToolDef::new("buffer_commit").requiring(["buffer", "message"]),
            Arc::new(BufferCommitHandler),
        );
        exec.register(
            ToolDef::new("buffer_rollback").requiring(["buffer"]),
            Arc::new(BufferRollbackHandler),
        );
        exec.register(
            ToolDef::new("buffer_branch").requiring(["buffer", "branch_name"]),
            Arc::new(BufferBranchHandler),
        );
        exec.register(
            ToolDef::new("buffer_switch_branch").requiring(["buffer", "branch_name"]),
            Arc::new(BufferSwitchBranchHandler),
        );
        exec.register(
            ToolDef::new("buffer_merge").requiring(["buffer", "source_branch"]),
            Arc::new(BufferMergeHandler),
        );
        exec.register(
            ToolDef::new("buffer_diff").requiring(["buffer", "from", "to"]),
            Arc::new(BufferDiffHandler),
        );
        exec.register(
            ToolDef::new("buffer_get_history").requiring(["buffer"]),
            Arc::new(BufferGetHistoryHandler),
        );
        exec
    }

    pub fn empty() -> Self {
        Self { tools: BTreeMap::new() }
    }

    pub fn register(&mut self, def: ToolDef, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(def.name.clone(), ToolEntry { def, handler });
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Validate args, gate on approval, run with a deadline, and report timing:
    /// gate on approval, run with a deadline, and report timing/outcome.
    #[instrument(skip(self, ctx, approval, call), fields(tool = %call.tool))]
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &dyn ToolContext,
        approval: &dyn ApprovalGate,
        auto_approve: bool,
        timeout_ms: u64,
    ) -> ToolResult {
        let entry = match self.tools.get(&call.tool) {
            Some(e) => e,
            None => {
                return error_result(ToolError::NotFound(call.tool.clone()), 0);
            }
        };

        if let Some(missing) = entry
            .def
            .required_args
            .iter()
            .find(|required| !call.args.contains_key(required.as_str()))
        {
            return error_result(
                ToolError::InvalidArgs(format!("missing required argument '{missing}' for tool '{}'", call.tool)),
                0,
            );
        }

        if entry.def.destructive && entry.def.requires_approval && !auto_approve {
            if !approval.request_approval(call).await {
                return error_result(ToolError::ApprovalDenied(call.tool.clone()), 0);
            }
        }

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            entry.handler.call(&call.args, ctx),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as i64;

        match outcome {
            Ok(Ok(data)) => ToolResult {
                success: true,
                data: Some(data),
                error: None,
                tokens_used: None,
                cost_cents: None,
                duration_ms,
                warnings: Vec::new(),
            },
            Ok(Err(e)) => ToolResult {
                success: false,
                data: None,
                error: Some(e.to_string()),
                tokens_used: None,
                cost_cents: None,
                duration_ms,
                warnings: Vec::new(),
            },
            Err(_elapsed) => ToolResult {
                success: false,
                data: None,
                error: Some("timeout".to_string()),
                tokens_used: None,
                cost_cents: None,
                duration_ms,
                warnings: Vec::new(),
            },
        }
    }
}

fn error_result(err: ToolError, duration_ms: i64) -> ToolResult {
    ToolResult {
        success: false,
        data: None,
        error: Some(err.to_string()),
        tokens_used: None,
        cost_cents: None,
        duration_ms,
        warnings: Vec::new(),
    }
}

// ============================================================================
// STANDARD TOOL HANDLERS
// ============================================================================

struct BqlExecuteHandler;

#[async_trait]
impl ToolHandler for BqlExecuteHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let pipeline = args
            .get("pipeline")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("pipeline must be a string".to_string()))?;
        let dry_run = args.get("dry_run").and_then(Value::as_bool).unwrap_or(false);
        let outcome = ctx.run_pipeline(pipeline, dry_run).await?;
        match outcome.error {
            Some(e) => Err(ToolError::AdapterFailure(e).into()),
            None => Ok(outcome.data.unwrap_or(Value::Null)),
        }
    }
}

struct SearchHandler;

#[async_trait]
impl ToolHandler for SearchHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("query must be a string".to_string()))?;
        let limit = args.get("limit").and_then(Value::as_int).map(|n| n.max(0) as usize);
        let results = ctx.run_search(query, SearchOptions { limit, filters: BTreeMap::new() }).await?;
        Ok(Value::List(
            results
                .into_iter()
                .map(|r| {
                    let mut m = BTreeMap::new();
                    m.insert("id".to_string(), Value::String(r.id));
                    m.insert("text".to_string(), Value::String(r.text));
                    m.insert("score".to_string(), Value::Float(r.score as f64));
                    Value::Map(m)
                })
                .collect(),
        ))
    }
}

fn buffer_name(args: &BTreeMap<String, Value>) -> Result<String, ToolError> {
    args.get("buffer")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ToolError::InvalidArgs("buffer must be a string".to_string()))
}

struct BufferSetContentHandler;

#[async_trait]
impl ToolHandler for BufferSetContentHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let content = args
            .get("content")
            .and_then(Value::as_list)
            .map(|l| l.to_vec())
            .ok_or_else(|| ToolError::InvalidArgs("content must be a list".to_string()))?;
        ctx.buffer_op(BufferOp::SetContent { buffer, content }).await
    }
}

struct BufferAppendHandler;

#[async_trait]
impl ToolHandler for BufferAppendHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let items = args
            .get("items")
            .and_then(Value::as_list)
            .map(|l| l.to_vec())
            .ok_or_else(|| ToolError::InvalidArgs("items must be a list".to_string()))?;
        ctx.buffer_op(BufferOp::Append { buffer, items }).await
    }
}

struct BufferCommitHandler;

#[async_trait]
impl ToolHandler for BufferCommitHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidArgs("message must be a string".to_string()))?;
        ctx.buffer_op(BufferOp::Commit { buffer, message }).await
    }
}

struct BufferRollbackHandler;

#[async_trait]
impl ToolHandler for BufferRollbackHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let steps = args.get("steps").and_then(Value::as_int).unwrap_or(1).max(0) as usize;
        ctx.buffer_op(BufferOp::Rollback { buffer, steps: steps.max(1) }).await
    }
}

struct BufferBranchHandler;

#[async_trait]
impl ToolHandler for BufferBranchHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let branch_name = args
            .get("branch_name")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidArgs("branch_name must be a string".to_string()))?;
        ctx.buffer_op(BufferOp::Branch { buffer, branch_name }).await
    }
}

struct BufferSwitchBranchHandler;

#[async_trait]
impl ToolHandler for BufferSwitchBranchHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let branch_name = args
            .get("branch_name")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidArgs("branch_name must be a string".to_string()))?;
        ctx.buffer_op(BufferOp::SwitchBranch { buffer, branch_name }).await
    }
}

struct BufferMergeHandler;

#[async_trait]
impl ToolHandler for BufferMergeHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let source_branch = args
            .get("source_branch")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidArgs("source_branch must be a string".to_string()))?;
        let strategy = args.get("strategy").and_then(Value::as_str).unwrap_or("auto").to_string();
        let message = args.get("message").and_then(Value::as_str).map(String::from);
        ctx.buffer_op(BufferOp::Merge { buffer, source_branch, strategy, message }).await
    }
}

struct BufferDiffHandler;

#[async_trait]
impl ToolHandler for BufferDiffHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let from = args
            .get("from")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidArgs("from must be a string".to_string()))?;
        let to = args
            .get("to")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidArgs("to must be a string".to_string()))?;
        ctx.buffer_op(BufferOp::Diff { buffer, from, to }).await
    }
}

struct BufferGetHistoryHandler;

#[async_trait]
impl ToolHandler for BufferGetHistoryHandler {
    async fn call(&self, args: &BTreeMap<String, Value>, ctx: &dyn ToolContext) -> UaosResult<Value> {
        let buffer = buffer_name(args)?;
        let limit = args.get("limit").and_then(Value::as_int).map(|n| n.max(0) as usize);
        ctx.buffer_op(BufferOp::GetHistory { buffer, limit }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeContext {
        pipeline_outcome: PipelineOutcome,
        search_results: Vec<SearchResultItem>,
        buffer_ops: Mutex<Vec<BufferOp>>,
    }

    #[async_trait]
    impl ToolContext for FakeContext {
        async fn run_pipeline(&self, _pipeline: &str, _dry_run: bool) -> UaosResult<PipelineOutcome> {
            Ok(self.pipeline_outcome.clone())
        }

        async fn run_search(&self, _query: &str, _opts: SearchOptions) -> UaosResult<Vec<SearchResultItem>> {
            Ok(self.search_results.clone())
        }

        async fn buffer_op(&self, op: BufferOp) -> UaosResult<Value> {
            self.buffer_ops.lock().unwrap().push(op);
            Ok(Value::Null)
        }
    }

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[tokio::test]
    async fn missing_required_arg_is_invalid_args() {
        let exec = ToolExecutor::with_standard_tools();
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Null),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall { tool: "search".into(), args: BTreeMap::new() };
        let result = exec.execute(&call, &ctx, &AlwaysApprove, false, 1000).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing required argument"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let exec = ToolExecutor::with_standard_tools();
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Null),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall { tool: "nonexistent".into(), args: BTreeMap::new() };
        let result = exec.execute(&call, &ctx, &AlwaysApprove, false, 1000).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn bql_execute_delegates_to_pipeline_adapter() {
        let exec = ToolExecutor::with_standard_tools();
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Int(42)),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall {
            tool: "bql_execute".into(),
            args: args(&[("pipeline", Value::from("harvest | load"))]),
        };
        let result = exec.execute(&call, &ctx, &AlwaysApprove, false, 1000).await;
        assert!(result.success);
        assert_eq!(result.data, Some(Value::Int(42)));
    }

    #[tokio::test]
    async fn bql_execute_propagates_pipeline_error() {
        let exec = ToolExecutor::with_standard_tools();
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::err("parse error"),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall {
            tool: "bql_execute".into(),
            args: args(&[("pipeline", Value::from("bad"))]),
        };
        let result = exec.execute(&call, &ctx, &AlwaysApprove, false, 1000).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn destructive_tool_denied_without_approval() {
        struct NoopHandler;
        #[async_trait]
        impl ToolHandler for NoopHandler {
            async fn call(&self, _args: &BTreeMap<String, Value>, _ctx: &dyn ToolContext) -> UaosResult<Value> {
                Ok(Value::Null)
            }
        }
        let mut exec = ToolExecutor::empty();
        exec.register(ToolDef::new("delete_all").destructive(), Arc::new(NoopHandler));
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Null),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall { tool: "delete_all".into(), args: BTreeMap::new() };
        let result = exec.execute(&call, &ctx, &AlwaysDeny, false, 1000).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("approval denied"));
    }

    #[tokio::test]
    async fn destructive_tool_allowed_with_auto_approve() {
        struct NoopHandler;
        #[async_trait]
        impl ToolHandler for NoopHandler {
            async fn call(&self, _args: &BTreeMap<String, Value>, _ctx: &dyn ToolContext) -> UaosResult<Value> {
                Ok(Value::Bool(true))
            }
        }
        let mut exec = ToolExecutor::empty();
        exec.register(ToolDef::new("delete_all").destructive(), Arc::new(NoopHandler));
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Null),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall { tool: "delete_all".into(), args: BTreeMap::new() };
        let result = exec.execute(&call, &ctx, &AlwaysDeny, true, 1000).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn timeout_yields_failed_result_not_error() {
        struct SlowHandler;
        #[async_trait]
        impl ToolHandler for SlowHandler {
            async fn call(&self, _args: &BTreeMap<String, Value>, _ctx: &dyn ToolContext) -> UaosResult<Value> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Value::Null)
            }
        }
        let mut exec = ToolExecutor::empty();
        exec.register(ToolDef::new("slow"), Arc::new(SlowHandler));
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Null),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall { tool: "slow".into(), args: BTreeMap::new() };
        let result = exec.execute(&call, &ctx, &AlwaysApprove, false, 5).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn buffer_commit_tool_delegates_op() {
        let exec = ToolExecutor::with_standard_tools();
        let ctx = FakeContext {
            pipeline_outcome: PipelineOutcome::ok(Value::Null),
            search_results: vec![],
            buffer_ops: Mutex::new(vec![]),
        };
        let call = ToolCall {
            tool: "buffer_commit".into(),
            args: args(&[("buffer", Value::from("B")), ("message", Value::from("msg"))]),
        };
        let result = exec.execute(&call, &ctx, &AlwaysApprove, false, 1000).await;
        assert!(result.success);
        assert_eq!(ctx.buffer_ops.lock().unwrap().len(), 1);
    }
}
