//! External collaborator contracts the core consumes (`spec.md` §6).
//!
//! The core never owns these implementations — a host process supplies
//! them. Shape follows the capability-trait pattern of
//! `agent::runtime::capability::{LLMCapability, ToolCapability}` and
//! `agent::contract::runtime::{ToolProvider, LLMProvider}`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RlmError;
use crate::types::{CoreEvent, EntryKey, ListFilter, ScratchpadEntry, ToolDescriptor};

/// Name → executor lookup. Contents are mutable only outside the
/// coordinator's execution window.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn lookup(&self, name: &str) -> Option<ToolDescriptor>;
    async fn names(&self) -> Vec<String>;
}

/// Reply from one `ModelManager::invoke` call.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ModelToolCall>,
    pub answer_update: Option<AnswerUpdate>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ModelToolCall {
    pub tool: String,
    pub params: crate::types::ToolParams,
}

#[derive(Debug, Clone)]
pub struct AnswerUpdate {
    pub content: Option<String>,
    pub ready: Option<bool>,
    pub confidence: Option<f64>,
    pub next_steps: Option<Vec<String>>,
}

/// Provider + transport. Must be safe for concurrent use; the core
/// never speaks the wire protocol itself (`spec.md` §1 Non-goals).
#[async_trait]
pub trait ModelManager: Send + Sync {
    async fn invoke(
        &self,
        model_id: &str,
        prompt: &str,
        options: &Value,
    ) -> Result<ModelReply, RlmError>;
}

/// Associative byte-blob store keyed by opaque strings, with directory
/// listing filtered by prefix/metadata. Must provide at-least-once
/// durability.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &EntryKey, entry: ScratchpadEntry) -> Result<(), RlmError>;
    async fn get(&self, key: &EntryKey) -> Result<Option<ScratchpadEntry>, RlmError>;
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ScratchpadEntry>, RlmError>;
}

/// Fire-and-forget publish; must never block the caller.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: CoreEvent);
}

/// Strictly sequential task source.
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn next_task(&self) -> Option<crate::types::SubTask>;
}
