//! [`uaos_tools::ToolContext`] implementation binding the Tool Executor's
//! `bql_execute`/`search`/`buffer_*` handlers to one session's buffers and
//! to the service's pipeline/search adapters.
//!
//! Grounded on `uaos-router::RouterDeps`'s posture of handing trait-object
//! collaborators to a free function rather than the function reaching into
//! a god object; here the collaborator is scoped to a single `SessionId` so
//! a tool call from one session's agent loop can never touch another's
//! buffers.

use async_trait::async_trait;
use uaos_adapters::{PipelineExecutor, PipelineOutcome, SearchOptions, SearchResultItem};
use uaos_tools::{BufferOp, ToolContext};
use uaos_types::{SessionId, UaosResult, Value};

use crate::UaosService;

/// Scopes tool dispatch to one session. Borrowed for the lifetime of a
/// single `run`/`resume` agent-loop call; never stored.
pub struct SessionToolContext<'a> {
    pub(crate) service: &'a UaosService,
    pub(crate) session_id: SessionId,
}

impl<'a> SessionToolContext<'a> {
    pub(crate) fn new(service: &'a UaosService, session_id: SessionId) -> Self {
        Self { service, session_id }
    }
}

#[async_trait]
impl<'a> ToolContext for SessionToolContext<'a> {
    async fn run_pipeline(&self, pipeline: &str, dry_run: bool) -> UaosResult<PipelineOutcome> {
        self.service.pipeline.execute(pipeline, dry_run).await
    }

    async fn run_search(&self, query: &str, opts: SearchOptions) -> UaosResult<Vec<SearchResultItem>> {
        let search_session_id = self.service.ensure_search_session(self.session_id).await?;
        self.service.search.search(search_session_id, query, opts).await
    }

    async fn buffer_op(&self, op: BufferOp) -> UaosResult<Value> {
        self.service.apply_buffer_op(self.session_id, op).await
    }
}
