//! Telemetry events published to the external event bus.
//!
//! Mirrors the kernel/runtime telemetry split in the corpus
//! (`TelemetryEvent`), but flattened to the ten kinds `spec.md` §6 names.

use serde::{Deserialize, Serialize};

use super::ids::{AgentId, EntryKey, ProviderId};
use crate::breaker::CircuitState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoreEvent {
    IterationStarted { iteration: u32 },
    IterationCompleted { iteration: u32, tokens_used: u64 },
    SubagentStarted { agent_id: AgentId, prompt: String },
    SubagentCompleted { agent_id: AgentId, key: EntryKey },
    SubagentFailed { agent_id: AgentId, error: String },
    ToolStarted { tool: String },
    ToolCompleted { tool: String },
    ToolFailed { tool: String, error: String },
    TokensUsed { count: u64 },
    CircuitStateChanged { provider: ProviderId, state: CircuitState },
}
