//! Model catalog entries: the data shape the router selects over.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ids::ProviderId;

/// One entry in a catalog snapshot. At most one entry per `id` in any
/// snapshot used for a selection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub provider: ProviderId,
    pub context_window: u64,
    pub prompt_price_per_million: f64,
    pub completion_price_per_million: f64,
    pub capabilities: HashSet<String>,
    /// Historical p50 latency in milliseconds, if known.
    pub p50_latency_ms: Option<u64>,
}

impl ModelCatalogEntry {
    pub fn average_cost_per_million(&self) -> f64 {
        (self.prompt_price_per_million + self.completion_price_per_million) / 2.0
    }

    /// Implementation-defined but stable quality score: more capability
    /// tags first, larger context window as a tiebreak. See
    /// `SPEC_FULL.md` §B for the rationale behind this specific shape.
    pub fn quality_score(&self) -> (usize, u64) {
        (self.capabilities.len(), self.context_window)
    }
}
