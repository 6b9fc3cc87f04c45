//! Top-level iterative driver (`spec.md` §4.1).
//!
//! Dispatch-loop shape grounded on
//! `agent::runtime::runtime::AgentRuntime::interpret`; budget bookkeeping
//! grounded on `agent::contract::kernel::AgentState`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::collab::{AnswerUpdate, EventBus, ModelManager, ModelToolCall, ToolRegistry};
use crate::config::RuntimeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RlmError;
use crate::router::ModelRouter;
use crate::scratchpad::Scratchpad;
use crate::scratchpad_view::ScratchpadView;
use crate::types::{
    Answer, CoreEvent, EntryKind, ModelCatalogEntry, ProviderId, SubTask, ToolParams, WriteRequest,
};

pub struct CoordinatorStatus {
    pub iteration: u32,
    pub tokens_used: u64,
    pub ready: bool,
    pub circuit_states: Vec<(ProviderId, CircuitState)>,
    pub active_subagents: usize,
}

pub struct Coordinator {
    config: RuntimeConfig,
    scratchpad: Arc<Scratchpad>,
    dispatcher: Arc<Dispatcher>,
    tools: Arc<dyn ToolRegistry>,
    model: Arc<dyn ModelManager>,
    events: Arc<dyn EventBus>,
    breaker: Arc<CircuitBreaker>,
    catalog: Vec<ModelCatalogEntry>,
    self_id: crate::types::AgentId,
    tokens_used: AtomicU64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RuntimeConfig,
        scratchpad: Arc<Scratchpad>,
        dispatcher: Arc<Dispatcher>,
        tools: Arc<dyn ToolRegistry>,
        model: Arc<dyn ModelManager>,
        events: Arc<dyn EventBus>,
        breaker: Arc<CircuitBreaker>,
        catalog: Vec<ModelCatalogEntry>,
    ) -> Self {
        Self {
            config,
            scratchpad,
            dispatcher,
            tools,
            model,
            events,
            breaker,
            catalog,
            self_id: crate::types::AgentId::new(),
            tokens_used: AtomicU64::new(0),
        }
    }

    pub fn status(&self, answer: &Answer) -> CoordinatorStatus {
        CoordinatorStatus {
            iteration: answer.iteration,
            tokens_used: self.tokens_used.load(Ordering::SeqCst),
            ready: answer.ready,
            circuit_states: self.circuit_states(),
            active_subagents: self.dispatcher.active_count(),
        }
    }

    /// One entry per distinct provider named in the catalog, in catalog
    /// order, reflecting the breaker's current view of each.
    fn circuit_states(&self) -> Vec<(ProviderId, CircuitState)> {
        let mut seen = std::collections::HashSet::new();
        self.catalog
            .iter()
            .map(|entry| &entry.provider)
            .filter(|provider| seen.insert((*provider).clone()))
            .map(|provider| (provider.clone(), self.breaker.state(provider)))
            .collect()
    }

    pub async fn execute_top(&self, ctx: &CancellationToken, prompt: &str) -> Answer {
        self.execute(ctx, prompt).await
    }

    pub async fn execute_task(&self, ctx: &CancellationToken, task: &SubTask) -> Answer {
        self.execute(ctx, &task.prompt).await
    }

    async fn execute(&self, ctx: &CancellationToken, prompt: &str) -> Answer {
        info!(max_iterations = self.config.coordinator.max_iterations, "coordinator starting");
        let mut answer = Answer::new();
        let coord_view = ScratchpadView::unbounded(self.scratchpad.clone());

        for i in 0..self.config.coordinator.max_iterations {
            self.events
                .publish(CoreEvent::IterationStarted { iteration: i })
                .await;

            if ctx.is_cancelled() {
                answer.annotate_failure("cancelled");
                return answer;
            }
            if self.tokens_used.load(Ordering::SeqCst) >= self.config.coordinator.max_tokens_budget
            {
                answer.annotate_failure("budget exhausted: token ceiling reached");
                return answer;
            }

            // 1. Compose the coordinator prompt from the original prompt,
            // the current answer, and top-K scratchpad summaries.
            let summaries = self.scratchpad.summaries(self.summary_token_budget()).await;
            let composed = self.compose_prompt(prompt, &answer, &summaries);

            // 2. Invoke the model through the router under the default tier.
            let reply = match self.invoke_router(&composed).await {
                Ok(reply) => reply,
                Err(RlmError::BreakerOpen { provider }) => {
                    debug!(provider, "breaker open with no admissible fallback");
                    answer.annotate_failure(&format!("circuit breaker open for {provider}"));
                    return answer;
                }
                Err(RlmError::NoCandidate) => {
                    answer.annotate_failure("no candidate model for default tier");
                    return answer;
                }
                Err(other) => {
                    answer.annotate_failure(&format!("router failure: {other}"));
                    return answer;
                }
            };

            let used = self
                .tokens_used
                .fetch_add(reply.prompt_tokens + reply.completion_tokens, Ordering::SeqCst)
                + reply.prompt_tokens
                + reply.completion_tokens;
            self.events
                .publish(CoreEvent::TokensUsed { count: used })
                .await;

            // 3. Execute tool calls sequentially, in order.
            for call in &reply.tool_calls {
                if ctx.is_cancelled() {
                    answer.annotate_failure("cancelled");
                    return answer;
                }
                self.events
                    .publish(CoreEvent::ToolStarted { tool: call.tool.clone() })
                    .await;
                self.run_tool_call(ctx, call, &mut answer, &coord_view).await;
            }

            if let Some(update) = &reply.answer_update {
                self.apply_answer_update(&mut answer, update);
            }

            // 4. Update iteration + tokens.
            answer.advance_iteration(i + 1);
            answer.add_tokens(reply.prompt_tokens + reply.completion_tokens);
            self.events
                .publish(CoreEvent::IterationCompleted {
                    iteration: answer.iteration,
                    tokens_used: self.tokens_used.load(Ordering::SeqCst),
                })
                .await;

            // 5. Termination.
            if answer.ready && answer.confidence() >= self.config.coordinator.confidence_threshold
            {
                return answer;
            }
            if i + 1 >= self.config.coordinator.max_iterations {
                answer.annotate_failure("budget exhausted: max iterations reached");
                return answer;
            }
            if self.tokens_used.load(Ordering::SeqCst) >= self.config.coordinator.max_tokens_budget
            {
                answer.annotate_failure("budget exhausted: token ceiling reached");
                return answer;
            }
        }

        answer.annotate_failure("budget exhausted: max iterations reached");
        answer
    }

    fn summary_token_budget(&self) -> u64 {
        // Same rough len/4 estimator used throughout the config surface;
        // reserve roughly a third of the remaining budget for context.
        let remaining = self
            .config
            .coordinator
            .max_tokens_budget
            .saturating_sub(self.tokens_used.load(Ordering::SeqCst));
        (remaining / 3).max(256)
    }

    /// Labeled multi-line blocks normally; under `encoding.use_compact`, a
    /// single `;`-joined line with no headers, since the model sees this
    /// text on every iteration and the compact form trades readability for
    /// fewer tokens.
    fn compose_prompt(&self, original: &str, answer: &Answer, summaries: &[(crate::types::EntryKey, String)]) -> String {
        if self.config.encoding.use_compact {
            let mut out = format!("P:{original}|A:{}", answer.content);
            for (key, summary) in summaries {
                out.push_str(&format!("|S[{key}]:{summary}"));
            }
            return out;
        }

        let mut out = format!("PROMPT: {original}\n\nCURRENT ANSWER:\n{}\n", answer.content);
        if !summaries.is_empty() {
            out.push_str("\nSCRATCHPAD SUMMARIES:\n");
            for (key, summary) in summaries {
                out.push_str(&format!("- [{key}] {summary}\n"));
            }
        }
        out
    }

    async fn invoke_router(&self, composed: &str) -> Result<crate::collab::ModelReply, RlmError> {
        let tier = self.config.coordinator.weight_default;
        let settings = self.config.tier(tier).cloned().unwrap_or_default();
        let model_id = ModelRouter::select(&settings, &self.catalog)?;
        let provider = self
            .catalog
            .iter()
            .find(|c| c.id == model_id)
            .map(|c| c.provider.clone())
            .unwrap_or_else(|| ProviderId::from("unknown"));

        self.breaker.admit(&provider)?;
        let before = self.breaker.state(&provider);
        let result = self.model.invoke(&model_id, composed, &serde_json::json!({})).await;
        match &result {
            Ok(_) => self.breaker.record_success(&provider),
            Err(e) => self.breaker.record_failure(&provider, e.to_string()),
        }
        let after = self.breaker.state(&provider);
        if after != before {
            self.events
                .publish(CoreEvent::CircuitStateChanged {
                    provider: provider.clone(),
                    state: after,
                })
                .await;
        }
        result
    }

    async fn run_tool_call(
        &self,
        ctx: &CancellationToken,
        call: &ModelToolCall,
        answer: &mut Answer,
        view: &ScratchpadView,
    ) {
        let result = match call.tool.as_str() {
            "delegate_batch" => self.run_delegate_batch(ctx, &call.params, answer).await,
            "set_answer" => {
                self.apply_set_answer(answer, &call.params);
                Ok(())
            }
            other => self.run_registry_tool(other, &call.params, view, answer).await,
        };

        match result {
            Ok(()) => {
                self.events
                    .publish(CoreEvent::ToolCompleted { tool: call.tool.clone() })
                    .await;
            }
            Err(err) => {
                self.events
                    .publish(CoreEvent::ToolFailed {
                        tool: call.tool.clone(),
                        error: err.to_string(),
                    })
                    .await;
                self.record_tool_failure(answer, &call.tool, &err).await;
            }
        }
    }

    async fn run_registry_tool(
        &self,
        tool: &str,
        params: &ToolParams,
        _view: &ScratchpadView,
        _answer: &mut Answer,
    ) -> Result<(), RlmError> {
        let descriptor = self.tools.lookup(tool).await.ok_or_else(|| RlmError::ToolFailure {
            tool: tool.to_string(),
            message: "tool not found in registry".to_string(),
        })?;
        let outcome = descriptor.executor.execute(params).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(RlmError::ToolFailure {
                tool: tool.to_string(),
                message: outcome.error.unwrap_or_default(),
            })
        }
    }

    /// Individual tool failures never abort the loop; they're recorded
    /// as a `tool-output` scratchpad entry with a failure flag.
    async fn record_tool_failure(&self, _answer: &mut Answer, tool: &str, err: &RlmError) {
        let req = WriteRequest::new(
            EntryKind::ToolOutput,
            format!("tool {tool} failed: {err}"),
            self.self_id.clone(),
        )
        .with_metadata("failed", serde_json::json!(true));
        let _ = self.scratchpad.write(req).await;
    }

    async fn run_delegate_batch(
        &self,
        ctx: &CancellationToken,
        params: &ToolParams,
        answer: &mut Answer,
    ) -> Result<(), RlmError> {
        let prompts = crate::types::tool::coerce_list(params, "tasks");
        let tasks: Vec<SubTask> = prompts
            .iter()
            .filter_map(|v| v.as_str())
            .map(SubTask::new)
            .collect();
        if tasks.is_empty() {
            return Err(RlmError::ToolFailure {
                tool: "delegate_batch".into(),
                message: "no tasks provided".into(),
            });
        }

        let model_id = ModelRouter::select(
            &self.config.tier(self.config.coordinator.weight_default).cloned().unwrap_or_default(),
            &self.catalog,
        )?;

        for task in &tasks {
            self.events
                .publish(CoreEvent::SubagentStarted {
                    agent_id: self.self_id.clone(),
                    prompt: task.prompt.clone(),
                })
                .await;
        }

        let results = self.dispatcher.dispatch_batch(ctx, tasks, &model_id).await?;
        for result in results {
            match result {
                Ok((key, _summary)) => {
                    self.events
                        .publish(CoreEvent::SubagentCompleted {
                            agent_id: self.self_id.clone(),
                            key: key.clone(),
                        })
                        .await;
                    answer.artifact_keys.push(key);
                }
                Err(err) => {
                    self.events
                        .publish(CoreEvent::SubagentFailed {
                            agent_id: self.self_id.clone(),
                            error: err.to_string(),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    fn apply_set_answer(&self, answer: &mut Answer, params: &ToolParams) {
        let update = AnswerUpdate {
            content: params.get("content").and_then(|v| v.as_str()).map(|s| s.to_string()),
            ready: params.get("ready").and_then(|v| v.as_bool()),
            confidence: params.get("confidence").and_then(|v| v.as_f64()),
            next_steps: params.get("next_steps").and_then(|v| v.as_array()).map(|arr| {
                arr.iter().filter_map(|x| x.as_str().map(str::to_string)).collect()
            }),
        };
        self.apply_answer_update(answer, &update);
    }

    fn apply_answer_update(&self, answer: &mut Answer, update: &AnswerUpdate) {
        if let Some(content) = &update.content {
            answer.content = content.clone();
        }
        if let Some(ready) = update.ready {
            answer.ready = ready;
        }
        if let Some(confidence) = update.confidence {
            answer.set_confidence(confidence);
        }
        if let Some(next_steps) = &update.next_steps {
            answer.next_steps = next_steps.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::collab::ModelReply;
    use crate::collab::StorageBackend;
    use crate::config::{BreakerConfig, CoordinatorConfig, PreferenceKey, SubagentConfig, TierSettings};
    use crate::types::{EntryKey, ListFilter, ScratchpadEntry, WeightTier};

    struct NoTools;
    #[async_trait]
    impl ToolRegistry for NoTools {
        async fn lookup(&self, _name: &str) -> Option<crate::types::ToolDescriptor> {
            None
        }
        async fn names(&self) -> Vec<String> {
            vec![]
        }
    }

    struct NullEvents;
    #[async_trait]
    impl EventBus for NullEvents {
        async fn publish(&self, _event: CoreEvent) {}
    }

    struct MemoryBackend {
        entries: Mutex<HashMap<String, ScratchpadEntry>>,
    }
    #[async_trait]
    impl StorageBackend for MemoryBackend {
        async fn put(&self, key: &EntryKey, entry: ScratchpadEntry) -> Result<(), RlmError> {
            self.entries.lock().unwrap().insert(key.as_str().to_string(), entry);
            Ok(())
        }
        async fn get(&self, key: &EntryKey) -> Result<Option<ScratchpadEntry>, RlmError> {
            Ok(self.entries.lock().unwrap().get(key.as_str()).cloned())
        }
        async fn list(&self, _filter: &ListFilter) -> Result<Vec<ScratchpadEntry>, RlmError> {
            Ok(self.entries.lock().unwrap().values().cloned().collect())
        }
    }

    /// S4 — burns 400 tokens/iteration without ever setting `ready`.
    struct BurnsTokensModel;
    #[async_trait]
    impl ModelManager for BurnsTokensModel {
        async fn invoke(
            &self,
            _model_id: &str,
            _prompt: &str,
            _options: &serde_json::Value,
        ) -> Result<ModelReply, RlmError> {
            Ok(ModelReply {
                content: String::new(),
                tool_calls: vec![],
                answer_update: None,
                prompt_tokens: 300,
                completion_tokens: 100,
            })
        }
    }

    fn catalog() -> Vec<ModelCatalogEntry> {
        vec![ModelCatalogEntry {
            id: "m".into(),
            provider: ProviderId::from("p"),
            context_window: 100_000,
            prompt_price_per_million: 1.0,
            completion_price_per_million: 1.0,
            capabilities: Default::default(),
            p50_latency_ms: None,
        }]
    }

    fn base_config() -> RuntimeConfig {
        let mut config = RuntimeConfig {
            coordinator: CoordinatorConfig {
                max_iterations: 3,
                max_tokens_budget: 1000,
                confidence_threshold: 0.8,
                weight_default: WeightTier::Medium,
            },
            subagent: SubagentConfig::default(),
            tiers: Default::default(),
            breaker: BreakerConfig::default(),
            encoding: Default::default(),
        };
        config.tiers.insert(
            WeightTier::Medium.config_key().to_string(),
            TierSettings {
                prefer: vec![PreferenceKey::Cost],
                ..Default::default()
            },
        );
        config
    }

    fn coordinator(model: Arc<dyn ModelManager>) -> Coordinator {
        let pad = Arc::new(Scratchpad::new(Arc::new(MemoryBackend {
            entries: Mutex::new(HashMap::new()),
        })));
        let config = base_config();
        let dispatcher = Dispatcher::new(
            config.subagent.clone(),
            pad.clone(),
            Arc::new(NoTools),
            model.clone(),
        );
        Coordinator::new(
            config,
            pad,
            dispatcher,
            Arc::new(NoTools),
            model,
            Arc::new(NullEvents),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            catalog(),
        )
    }

    #[tokio::test]
    async fn s4_budget_exhaustion() {
        let coord = coordinator(Arc::new(BurnsTokensModel));
        let ctx = CancellationToken::new();
        let answer = coord.execute_top(&ctx, "solve it").await;
        assert!(!answer.ready);
        assert_eq!(answer.iteration, 3);
        assert!(answer.content.contains("budget exhausted"));
    }

    #[tokio::test]
    async fn cancellation_returns_not_ready() {
        let coord = coordinator(Arc::new(BurnsTokensModel));
        let ctx = CancellationToken::new();
        ctx.cancel();
        let answer = coord.execute_top(&ctx, "solve it").await;
        assert!(!answer.ready);
    }
}
