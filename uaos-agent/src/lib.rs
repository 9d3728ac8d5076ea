//! ReAct agent loop (C5): plan, reason, act, observe, complete — an explicit
//! state machine rather than an async call chain, so suspension points
//! (`awaiting_input`) are ordinary returns to the caller instead of hidden
//! continuations.
//!
//! Uses a typestate-adjacent style: `AgentTaskStatus::is_terminal()`
//! rejects further mutation once a task reaches a terminal status, the
//! same guard-your-own-transitions posture used elsewhere in this
//! workspace, generalized here to more than two live states.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;
use uaos_adapters::{LlmAdapter, LlmRequest, ReasoningResult};
use uaos_tools::{ApprovalGate, ToolContext, ToolExecutor};
use uaos_types::identity::EntityIdType;
use uaos_types::{
    AgentError, AgentStep, AgentStepType, AgentTask, AgentTaskStatus, NextAction, SessionId, StepId,
    TaskId, ToolCall, UaosResult,
};

/// Shared cancellation signal, checked at every loop boundary. Cloning is
/// cheap; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelFlag(std::sync::Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentRunOptions {
    pub max_steps: usize,
    pub tool_timeout_ms: u64,
    pub auto_approve: bool,
    pub model: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AgentRunOptions {
    fn default() -> Self {
        Self {
            max_steps: 10,
            tool_timeout_ms: 30_000,
            auto_approve: false,
            model: "default",
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// Creates a task in `pending` with the seed reasoning step recording the
/// incoming request. Call [`run`] next to drive it to completion.
pub fn new_task(session_id: SessionId, request: impl Into<String>) -> AgentTask {
    let now = Utc::now();
    let request = request.into();
    let seed_step = AgentStep {
        id: StepId::now_v7(),
        step_type: AgentStepType::Reason,
        content: format!("received request: {request}"),
        tool_call: None,
        tool_result: None,
        timestamp: now,
        duration_ms: 0,
        tokens: 0,
        confidence: None,
    };
    AgentTask {
        id: TaskId::now_v7(),
        session_id,
        request,
        status: AgentTaskStatus::Pending,
        steps: vec![seed_step],
        plan: None,
        current_step_index: 1,
        result: None,
        error: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
        total_tokens: 0,
        total_cost_cents: 0.0,
        priority: 0,
    }
}

/// Returns the question posed by the most recent `ask_user` action, if the
/// task is currently `awaiting_input`.
pub fn pending_question(task: &AgentTask) -> Option<&str> {
    if task.status != AgentTaskStatus::AwaitingInput {
        return None;
    }
    task.steps
        .iter()
        .rev()
        .find(|s| s.step_type == AgentStepType::Reason)
        .map(|s| s.content.as_str())
}

/// Drives a freshly created task from `pending` through the ReAct loop
/// until it completes, fails, is cancelled, or suspends awaiting input.
#[instrument(skip(task, llm, tools, ctx, approval), fields(task_id = %task.id))]
pub async fn run(
    task: &mut AgentTask,
    llm: &dyn LlmAdapter,
    tools: &ToolExecutor,
    ctx: &dyn ToolContext,
    approval: &dyn ApprovalGate,
    opts: &AgentRunOptions,
    cancel: &CancelFlag,
) -> UaosResult<()> {
    if task.status != AgentTaskStatus::Pending {
        return Err(AgentError::WrongPhase(task.status.to_string()).into());
    }
    task.status = AgentTaskStatus::Planning;
    drive_loop(task, llm, tools, ctx, approval, opts, cancel).await
}

/// Resumes a task suspended in `awaiting_input`, recording `answer` as the
/// observation for the question that suspended it, then re-enters the loop.
#[instrument(skip(task, llm, tools, ctx, approval), fields(task_id = %task.id))]
pub async fn resume(
    task: &mut AgentTask,
    answer: impl Into<String>,
    llm: &dyn LlmAdapter,
    tools: &ToolExecutor,
    ctx: &dyn ToolContext,
    approval: &dyn ApprovalGate,
    opts: &AgentRunOptions,
    cancel: &CancelFlag,
) -> UaosResult<()> {
    if task.status != AgentTaskStatus::AwaitingInput {
        return Err(AgentError::WrongPhase(task.status.to_string()).into());
    }
    append_step(task, AgentStepType::Observe, answer.into(), None, None, 0, None);
    task.status = AgentTaskStatus::Executing;
    drive_loop(task, llm, tools, ctx, approval, opts, cancel).await
}

async fn drive_loop(
    task: &mut AgentTask,
    llm: &dyn LlmAdapter,
    tools: &ToolExecutor,
    ctx: &dyn ToolContext,
    approval: &dyn ApprovalGate,
    opts: &AgentRunOptions,
    cancel: &CancelFlag,
) -> UaosResult<()> {
    for _ in 0..opts.max_steps {
        if cancel.is_cancelled() {
            fail_as_cancelled(task);
            return Ok(());
        }

        let reasoning = match llm.reason(reasoning_request(task, opts)).await {
            Ok(r) => r,
            Err(e) => {
                fail_with_error(task, e.to_string());
                return Err(e);
            }
        };
        task.total_tokens += reasoning.tokens.input_tokens + reasoning.tokens.output_tokens;
        if let Some(cost) = reasoning.tokens.cost_cents {
            task.total_cost_cents += cost;
        }
        append_step(
            task,
            AgentStepType::Reason,
            reasoning.reasoning.clone(),
            None,
            None,
            reasoning.tokens.latency_ms,
            reasoning.confidence,
        );
        task.status = AgentTaskStatus::Executing;

        if cancel.is_cancelled() {
            fail_as_cancelled(task);
            return Ok(());
        }

        match reasoning.next_action {
            NextAction::Complete => {
                append_step(task, AgentStepType::Complete, reasoning.reasoning.clone(), None, None, 0, None);
                task.result = reasoning.answer.clone();
                task.status = AgentTaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.updated_at = Utc::now();
                return Ok(());
            }
            NextAction::AskUser => {
                let question = reasoning.question.clone().unwrap_or_default();
                append_step(task, AgentStepType::Reason, question, None, None, 0, None);
                task.status = AgentTaskStatus::AwaitingInput;
                task.updated_at = Utc::now();
                return Ok(());
            }
            NextAction::AdjustPlan => {
                task.plan = Some(reasoning.reasoning.clone());
                append_step(task, AgentStepType::Adjust, reasoning.reasoning.clone(), None, None, 0, None);
            }
            NextAction::Tool => {
                let Some(call) = reasoning.tool_call.clone() else {
                    fail_with_error(task, "tool action without a tool call".to_string());
                    return Err(AgentError::AdapterFailure("tool action without a tool call".to_string()).into());
                };
                append_step(task, AgentStepType::Act, format!("invoke {}", call.tool), Some(call.clone()), None, 0, None);
                let result = tools.execute(&call, ctx, approval, opts.auto_approve, opts.tool_timeout_ms).await;
                if let Some(tokens) = result.tokens_used {
                    task.total_tokens += tokens;
                }
                if let Some(cost) = result.cost_cents {
                    task.total_cost_cents += cost;
                }
                let observation = match &result.error {
                    Some(e) => format!("tool {} failed: {e}", call.tool),
                    None => format!("tool {} succeeded", call.tool),
                };
                append_step(task, AgentStepType::Observe, observation, None, Some(result), 0, None);
            }
        }
        task.updated_at = Utc::now();
    }

    task.status = AgentTaskStatus::Failed;
    task.error = Some("max steps exceeded".to_string());
    task.updated_at = Utc::now();
    Err(AgentError::MaxStepsExceeded.into())
}

fn reasoning_request(task: &AgentTask, opts: &AgentRunOptions) -> LlmRequest {
    let transcript: String = task
        .steps
        .iter()
        .map(|s| format!("[{}] {}\n", s.step_type.as_db_str(), s.content))
        .collect();
    LlmRequest {
        system_prompt: "You are the orchestration core's reasoning adapter.".to_string(),
        user_prompt: transcript,
        model: opts.model.to_string(),
        temperature: opts.temperature,
        max_tokens: opts.max_tokens,
    }
}

fn append_step(
    task: &mut AgentTask,
    step_type: AgentStepType,
    content: String,
    tool_call: Option<ToolCall>,
    tool_result: Option<uaos_types::ToolResult>,
    duration_ms: i64,
    confidence: Option<f32>,
) {
    let tokens = tool_result.as_ref().and_then(|r| r.tokens_used).unwrap_or(0);
    task.steps.push(AgentStep {
        id: StepId::now_v7(),
        step_type,
        content,
        tool_call,
        tool_result,
        timestamp: Utc::now(),
        duration_ms,
        tokens,
        confidence,
    });
    task.current_step_index = task.steps.len();
}

fn fail_with_error(task: &mut AgentTask, message: String) {
    append_step(task, AgentStepType::Error, message.clone(), None, None, 0, None);
    task.status = AgentTaskStatus::Failed;
    task.error = Some(message);
    task.updated_at = Utc::now();
}

fn fail_as_cancelled(task: &mut AgentTask) {
    task.status = AgentTaskStatus::Cancelled;
    task.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use uaos_adapters::{LlmResponse, PipelineOutcome, SearchOptions, SearchResultItem};
    use uaos_tools::{AlwaysApprove, BufferOp};
    use uaos_types::Value;

    struct NullContext;

    #[async_trait]
    impl ToolContext for NullContext {
        async fn run_pipeline(&self, _pipeline: &str, _dry_run: bool) -> UaosResult<PipelineOutcome> {
            Ok(PipelineOutcome::ok(Value::List(vec![Value::Int(1), Value::Int(2)])))
        }

        async fn run_search(&self, _query: &str, _opts: SearchOptions) -> UaosResult<Vec<SearchResultItem>> {
            Ok(vec![
                SearchResultItem { id: "r1".into(), node_id: None, text: "a".into(), score: 0.9 },
                SearchResultItem { id: "r2".into(), node_id: None, text: "b".into(), score: 0.8 },
            ])
        }

        async fn buffer_op(&self, _op: BufferOp) -> UaosResult<Value> {
            Ok(Value::Null)
        }
    }

    fn reasoning(
        action: NextAction,
        tool_call: Option<ToolCall>,
        answer: Option<&str>,
    ) -> ReasoningResult {
        ReasoningResult {
            next_action: action,
            reasoning: "thinking".to_string(),
            tool_call,
            answer: answer.map(String::from),
            question: None,
            confidence: Some(0.9),
            tokens: LlmResponse { text: String::new(), input_tokens: 10, output_tokens: 5, latency_ms: 1, cost_cents: Some(0.01) },
        }
    }

    #[tokio::test]
    async fn completes_after_two_tool_calls_and_final_answer() {
        let script = vec![
            reasoning(
                NextAction::Tool,
                Some(ToolCall { tool: "bql_execute".into(), args: BTreeMap::from([("pipeline".to_string(), Value::from("harvest | load"))]) }),
                None,
            ),
            reasoning(
                NextAction::Tool,
                Some(ToolCall { tool: "search".into(), args: BTreeMap::from([("query".to_string(), Value::from("find x"))]) }),
                None,
            ),
            reasoning(NextAction::Complete, None, Some("done")),
        ];
        let llm = uaos_adapters::ScriptedLlmAdapter::new(script);
        let tools = ToolExecutor::with_standard_tools();
        let ctx = NullContext;
        let opts = AgentRunOptions::default();
        let cancel = CancelFlag::new();

        let mut task = new_task(SessionId::now_v7(), "build me a report");
        run(&mut task, &llm, &tools, &ctx, &AlwaysApprove, &opts, &cancel).await.unwrap();

        assert_eq!(task.status, AgentTaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
        let kinds: Vec<AgentStepType> = task.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            kinds,
            vec![
                AgentStepType::Reason,
                AgentStepType::Reason,
                AgentStepType::Act,
                AgentStepType::Observe,
                AgentStepType::Reason,
                AgentStepType::Act,
                AgentStepType::Observe,
                AgentStepType::Reason,
                AgentStepType::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn step_overflow_fails_the_task() {
        let mut script = Vec::new();
        for _ in 0..12 {
            script.push(reasoning(NextAction::AdjustPlan, None, None));
        }
        let llm = uaos_adapters::ScriptedLlmAdapter::new(script);
        let tools = ToolExecutor::with_standard_tools();
        let ctx = NullContext;
        let opts = AgentRunOptions { max_steps: 3, ..AgentRunOptions::default() };
        let cancel = CancelFlag::new();

        let mut task = new_task(SessionId::now_v7(), "loop forever");
        let err = run(&mut task, &llm, &tools, &ctx, &AlwaysApprove, &opts, &cancel).await;
        assert!(err.is_err());
        assert_eq!(task.status, AgentTaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("max steps exceeded"));
    }

    #[tokio::test]
    async fn ask_user_suspends_and_resume_continues_to_completion() {
        let script = vec![
            {
                let mut r = reasoning(NextAction::AskUser, None, None);
                r.question = Some("which format?".to_string());
                r
            },
            reasoning(NextAction::Complete, None, Some("markdown it is")),
        ];
        let llm = uaos_adapters::ScriptedLlmAdapter::new(script);
        let tools = ToolExecutor::with_standard_tools();
        let ctx = NullContext;
        let opts = AgentRunOptions::default();
        let cancel = CancelFlag::new();

        let mut task = new_task(SessionId::now_v7(), "export the book");
        run(&mut task, &llm, &tools, &ctx, &AlwaysApprove, &opts, &cancel).await.unwrap();
        assert_eq!(task.status, AgentTaskStatus::AwaitingInput);
        assert_eq!(pending_question(&task), Some("which format?"));

        resume(&mut task, "markdown", &llm, &tools, &ctx, &AlwaysApprove, &opts, &cancel).await.unwrap();
        assert_eq!(task.status, AgentTaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("markdown it is"));
    }

    #[tokio::test]
    async fn cancellation_before_first_reasoning_call_marks_cancelled() {
        let llm = uaos_adapters::ScriptedLlmAdapter::new(vec![reasoning(NextAction::Complete, None, Some("x"))]);
        let tools = ToolExecutor::with_standard_tools();
        let ctx = NullContext;
        let opts = AgentRunOptions::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut task = new_task(SessionId::now_v7(), "anything");
        run(&mut task, &llm, &tools, &ctx, &AlwaysApprove, &opts, &cancel).await.unwrap();
        assert_eq!(task.status, AgentTaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn running_a_non_pending_task_is_rejected() {
        let llm = uaos_adapters::ScriptedLlmAdapter::new(vec![reasoning(NextAction::Complete, None, Some("x"))]);
        let tools = ToolExecutor::with_standard_tools();
        let ctx = NullContext;
        let opts = AgentRunOptions::default();
        let cancel = CancelFlag::new();

        let mut task = new_task(SessionId::now_v7(), "anything");
        task.status = AgentTaskStatus::Completed;
        let err = run(&mut task, &llm, &tools, &ctx, &AlwaysApprove, &opts, &cancel).await;
        assert!(err.is_err());
    }
}
