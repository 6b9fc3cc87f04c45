//! Executes exactly one sub-task to a task-local `Answer`.
//!
//! Loop shape grounded on `agent::runtime::runtime::AgentRuntime::interpret`
//! (decision → capability dispatch); whitelist enforcement grounded on
//! `agent::contract::config::ToolPolicy::is_allowed`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::collab::{ModelManager, ToolRegistry};
use crate::dispatcher::Dispatcher;
use crate::error::RlmError;
use crate::scratchpad_view::ScratchpadView;
use crate::types::{AgentId, Answer, EntryKind, SubTask, ToolParams, WriteRequest};

/// Per-sub-agent iteration cap, smaller than the coordinator's, per
/// `spec.md` §4.3.
const DEFAULT_SUBAGENT_MAX_ITERATIONS: u32 = 6;

pub struct SubAgent {
    pub id: AgentId,
    tools: Arc<dyn ToolRegistry>,
    model: Arc<dyn ModelManager>,
    model_id: String,
    max_iterations: u32,
    /// Set when this sub-agent is allowed to recurse via `delegate_batch`
    /// (`spec.md` §9: "`delegate_batch` can in principle recurse").
    /// `None` for sub-agents spawned without dispatcher access.
    dispatcher: Option<Arc<Dispatcher>>,
    depth: u32,
}

impl SubAgent {
    pub fn new(tools: Arc<dyn ToolRegistry>, model: Arc<dyn ModelManager>, model_id: String) -> Self {
        Self {
            id: AgentId::new(),
            tools,
            model,
            model_id,
            max_iterations: DEFAULT_SUBAGENT_MAX_ITERATIONS,
            dispatcher: None,
            depth: 0,
        }
    }

    /// Enables recursive delegation. Children are tagged `depth + 1`; the
    /// dispatcher's recursion cap (`spec.md` §9, default 2) rejects them
    /// once the cap is exceeded.
    pub fn with_delegate(mut self, dispatcher: Option<Arc<Dispatcher>>, depth: u32) -> Self {
        self.dispatcher = dispatcher;
        self.depth = depth;
        self
    }

    /// Runs the task to completion, writing a `sub-answer` scratchpad
    /// entry and returning its key plus the answer's sanitized summary.
    pub async fn run(
        &self,
        task: &SubTask,
        view: &ScratchpadView,
        ctx: &CancellationToken,
    ) -> Result<(crate::types::EntryKey, String), RlmError> {
        let mut answer = Answer::new();
        let mut prompt = task.prompt.clone();

        for i in 0..self.max_iterations {
            if ctx.is_cancelled() {
                return Err(RlmError::Cancelled);
            }

            let reply = self
                .model
                .invoke(&self.model_id, &prompt, &serde_json::json!({}))
                .await?;
            answer.add_tokens(reply.prompt_tokens + reply.completion_tokens);

            if let Some(update) = &reply.answer_update {
                if let Some(content) = &update.content {
                    answer.content = content.clone();
                }
                if let Some(ready) = update.ready {
                    answer.ready = ready;
                }
                if let Some(confidence) = update.confidence {
                    answer.set_confidence(confidence);
                }
            }

            for call in &reply.tool_calls {
                if ctx.is_cancelled() {
                    return Err(RlmError::Cancelled);
                }
                match self.execute_tool(task, &call.tool, &call.params, view, ctx).await {
                    Ok(observation) => {
                        prompt = format!("{prompt}\n[tool:{} ok] {observation}", call.tool);
                    }
                    Err(err) => {
                        prompt = format!("{prompt}\n[tool:{} error] {err}", call.tool);
                    }
                }
            }

            answer.advance_iteration(i + 1);
            if answer.ready {
                break;
            }
        }

        let summary = answer.sanitized_content();
        let req = WriteRequest::new(
            EntryKind::SubAnswer,
            if summary.is_empty() { "(no content)".to_string() } else { summary.clone() },
            self.id.clone(),
        )
        .with_payload(summary.clone().into_bytes());
        let key = view.write(req).await?;
        Ok((key, summary))
    }

    /// Enforces the tool whitelist: an unlisted tool fails with
    /// `ToolNotPermitted`, fed back to the model as a recoverable
    /// observation rather than aborting the sub-agent.
    async fn execute_tool(
        &self,
        task: &SubTask,
        tool: &str,
        params: &ToolParams,
        view: &ScratchpadView,
        ctx: &CancellationToken,
    ) -> Result<String, RlmError> {
        if !task.is_tool_allowed(tool) {
            return Err(RlmError::ToolNotPermitted {
                tool: tool.to_string(),
            });
        }

        if tool == "scratchpad_write" {
            let summary = crate::types::tool::coerce_str(params, "summary", "").to_string();
            let req = WriteRequest::new(EntryKind::ToolOutput, summary, self.id.clone());
            let key = view.write(req).await?;
            return Ok(key.to_string());
        }
        if tool == "scratchpad_read" {
            let key_str = crate::types::tool::coerce_str(params, "key", "");
            let key = crate::types::EntryKey::from(key_str);
            let entry = view.read(&key).await?;
            return Ok(entry.summary);
        }
        if tool == "delegate_batch" {
            return self.delegate_batch(params, ctx).await;
        }

        let descriptor = self
            .tools
            .lookup(tool)
            .await
            .ok_or_else(|| RlmError::ToolFailure {
                tool: tool.to_string(),
                message: "tool not found in registry".to_string(),
            })?;
        let outcome = descriptor.executor.execute(params).await?;
        if outcome.success {
            Ok(outcome.data.to_string())
        } else {
            Err(RlmError::ToolFailure {
                tool: tool.to_string(),
                message: outcome.error.unwrap_or_default(),
            })
        }
    }

    /// Recursive self-dispatch: children are tagged `depth + 1` and run
    /// through the same dispatcher that spawned this sub-agent, so the
    /// recursion cap applies uniformly regardless of nesting depth.
    async fn delegate_batch(&self, params: &ToolParams, ctx: &CancellationToken) -> Result<String, RlmError> {
        let dispatcher = self.dispatcher.clone().ok_or_else(|| RlmError::ToolFailure {
            tool: "delegate_batch".into(),
            message: "this sub-agent has no dispatcher to recurse through".into(),
        })?;

        let prompts = crate::types::tool::coerce_list(params, "tasks");
        let child_tasks: Vec<SubTask> = prompts
            .iter()
            .filter_map(|v| v.as_str())
            .map(|prompt| {
                let mut task = SubTask::new(prompt);
                task.depth = self.depth + 1;
                task
            })
            .collect();
        if child_tasks.is_empty() {
            return Err(RlmError::ToolFailure {
                tool: "delegate_batch".into(),
                message: "no tasks provided".into(),
            });
        }

        let results = dispatcher.dispatch_batch(ctx, child_tasks, &self.model_id).await?;
        let mut observation = String::new();
        for result in results {
            match result {
                Ok((key, _)) => observation.push_str(&format!("{key} ")),
                Err(err) => observation.push_str(&format!("<failed: {err}> ")),
            }
        }
        Ok(observation.trim().to_string())
    }
}
