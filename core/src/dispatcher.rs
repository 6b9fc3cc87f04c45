//! Bounded-concurrency worker pool running delegated sub-tasks.
//!
//! Grounded on `agent::tools::delegate::DelegateTool` (background-task
//! spawn raced against a `CancellationToken` via `select!`) and
//! `agent::runtime::workers::WorkerRuntime` (active-worker bookkeeping).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collab::{ModelManager, ToolRegistry};
use crate::config::SubagentConfig;
use crate::error::RlmError;
use crate::scratchpad::Scratchpad;
use crate::scratchpad_view::ScratchpadView;
use crate::subagent::SubAgent;
use crate::types::{EntryKey, SubTask};

pub struct Dispatcher {
    config: SubagentConfig,
    semaphore: Arc<Semaphore>,
    scratchpad: Arc<Scratchpad>,
    tools: Arc<dyn ToolRegistry>,
    model: Arc<dyn ModelManager>,
    active: AtomicUsize,
    /// Handle back to itself, handed to spawned sub-agents so
    /// `delegate_batch` can recurse (`spec.md` §9: "`delegate_batch` can
    /// in principle recurse").
    self_ref: Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn new(
        config: SubagentConfig,
        scratchpad: Arc<Scratchpad>,
        tools: Arc<dyn ToolRegistry>,
        model: Arc<dyn ModelManager>,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Arc::new_cyclic(|self_ref| Self {
            config,
            semaphore,
            scratchpad,
            tools,
            model,
            active: AtomicUsize::new(0),
            self_ref: self_ref.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Dispatches a single sub-task, grounded on the single-call shape of
    /// `spec.md` §4.2 `Dispatch`.
    pub async fn dispatch(
        &self,
        ctx: &CancellationToken,
        task: SubTask,
        model_id: &str,
    ) -> Result<(EntryKey, String), RlmError> {
        if task.depth >= self.config.max_recursion_depth {
            return Err(RlmError::Overloaded);
        }
        self.validate_tools(std::slice::from_ref(&task)).await?;
        let batch_cutoff = Utc::now();
        self.run_one(ctx, task, model_id, batch_cutoff).await
    }

    /// Dispatches a batch. Admission is atomic: either every task is
    /// accepted or none are (queue-depth check and tool-existence check),
    /// but execution proceeds independently per-task thereafter. Results
    /// come back in submission order regardless of completion order.
    pub async fn dispatch_batch(
        &self,
        ctx: &CancellationToken,
        tasks: Vec<SubTask>,
        model_id: &str,
    ) -> Result<Vec<Result<(EntryKey, String), RlmError>>, RlmError> {
        if tasks.len() > self.config.queue_depth_limit {
            return Err(RlmError::Overloaded);
        }
        self.validate_tools(&tasks).await?;

        // All siblings share one cutoff: the batch's admission instant.
        // None of them observe each other's in-flight writes.
        let batch_cutoff = Utc::now();

        let mut futures = FuturesUnordered::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let model_id = model_id.to_string();
            futures.push(async move {
                let result = self.run_one(ctx, task, &model_id, batch_cutoff).await;
                (index, result)
            });
        }

        let mut ordered: Vec<Option<Result<(EntryKey, String), RlmError>>> =
            (0..futures.len()).map(|_| None).collect();
        while let Some((index, result)) = futures.next().await {
            ordered[index] = Some(result);
        }

        Ok(ordered.into_iter().map(|r| r.expect("every index filled")).collect())
    }

    async fn run_one(
        &self,
        ctx: &CancellationToken,
        task: SubTask,
        model_id: &str,
        batch_cutoff: chrono::DateTime<Utc>,
    ) -> Result<(EntryKey, String), RlmError> {
        if task.depth >= self.config.max_recursion_depth {
            return Err(RlmError::Overloaded);
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RlmError::Internal {
                message: "dispatcher semaphore closed".into(),
            })?;
        self.active.fetch_add(1, Ordering::SeqCst);
        let _guard = scopeguard(&self.active);

        let view = ScratchpadView::bounded(self.scratchpad.clone(), batch_cutoff);
        let agent = SubAgent::new(self.tools.clone(), self.model.clone(), model_id.to_string())
            .with_delegate(self.self_ref.upgrade(), task.depth);
        let child_ctx = ctx.child_token();
        let timeout = Duration::from_secs(self.config.per_task_timeout_secs);

        let run = agent.run(&task, &view, &child_ctx);
        let result = tokio::select! {
            _ = ctx.cancelled() => Err(RlmError::Cancelled),
            res = tokio::time::timeout(timeout, run) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    child_ctx.cancel();
                    warn!(per_task_timeout_secs = self.config.per_task_timeout_secs, "sub-agent timed out");
                    Err(RlmError::Cancelled)
                }
            },
        };

        drop(permit);
        result
    }

    /// `spec.md` §3: requested tools must all exist in the registry at
    /// dispatch time. Checked once against a single registry listing
    /// rather than per-task, since the set is shared across the batch.
    /// `scratchpad_write`/`scratchpad_read` are sub-agent built-ins
    /// (`SubAgent::execute_tool`) and never live in the registry, so
    /// they're exempt from this check.
    async fn validate_tools(&self, tasks: &[SubTask]) -> Result<(), RlmError> {
        let known: std::collections::HashSet<String> = self.tools.names().await.into_iter().collect();
        for task in tasks {
            if let Some(allowed) = &task.allowed_tools {
                for tool in allowed {
                    if tool == "scratchpad_write" || tool == "scratchpad_read" {
                        continue;
                    }
                    if !known.contains(tool) {
                        return Err(RlmError::ToolNotPermitted { tool: tool.clone() });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decrements `active` when dropped, regardless of which path out of
/// `run_one` is taken.
struct ActiveGuard<'a>(&'a AtomicUsize);
impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
fn scopeguard(active: &AtomicUsize) -> ActiveGuard<'_> {
    ActiveGuard(active)
}
