//! Configuration surface: the recognized keys of `spec.md` §6, loadable
//! from a TOML file with environment-variable overrides, following the
//! `AgentConfig::from_file`/`load`/`merge` idiom.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::WeightTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub subagent: SubagentConfig,
    /// Keyed by `WeightTier::config_key()` (TOML tables require string
    /// keys).
    #[serde(default)]
    pub tiers: HashMap<String, TierSettings>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            subagent: SubagentConfig::default(),
            tiers: HashMap::new(),
            breaker: BreakerConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Loads from the given path if present, otherwise returns defaults,
    /// then applies environment overrides — matching
    /// `AgentConfig::load`/`EnvConfig::load`.
    pub fn load(path: Option<&Path>) -> Self {
        let base = match path {
            Some(p) if p.exists() => Self::from_file(p).unwrap_or_default(),
            _ => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Fields present in `other` take precedence, mirroring the
    /// teacher's per-substruct `merge()` methods.
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.coordinator.merge(other.coordinator);
        self.subagent.merge(other.subagent);
        for (tier_key, settings) in other.tiers {
            self.tiers.insert(tier_key, settings);
        }
        self.breaker.merge(other.breaker);
        self.encoding.merge(other.encoding);
    }

    pub fn tier(&self, tier: WeightTier) -> Option<&TierSettings> {
        self.tiers.get(tier.config_key())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("RLM_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                self.coordinator.max_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("RLM_MAX_TOKENS_BUDGET") {
            if let Ok(n) = v.parse() {
                self.coordinator.max_tokens_budget = n;
            }
        }
        if let Ok(v) = std::env::var("RLM_CONFIDENCE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.coordinator.confidence_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("RLM_SUBAGENT_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                self.subagent.max_concurrent = n;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub max_iterations: u32,
    pub max_tokens_budget: u64,
    pub confidence_threshold: f64,
    pub weight_default: WeightTier,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tokens_budget: 100_000,
            confidence_threshold: 0.8,
            weight_default: WeightTier::Medium,
        }
    }
}

impl CoordinatorConfig {
    fn merge(&mut self, other: CoordinatorConfig) {
        *self = other;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    pub max_concurrent: usize,
    pub per_task_timeout_secs: u64,
    pub queue_depth_limit: usize,
    pub max_recursion_depth: u32,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            per_task_timeout_secs: 120,
            queue_depth_limit: 64,
            max_recursion_depth: 2,
        }
    }
}

impl SubagentConfig {
    fn merge(&mut self, other: SubagentConfig) {
        *self = other;
    }
}

/// One weight tier's routing policy, keyed by `WeightTier` in
/// `RuntimeConfig::tiers`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TierSettings {
    pub prefer: Vec<PreferenceKey>,
    pub min_context_window: Option<u64>,
    pub max_cost_per_million: Option<f64>,
    pub provider: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    pub pin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKey {
    Cost,
    Quality,
    Latency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub open_duration_secs: u64,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_duration_secs: 30,
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    fn merge(&mut self, other: BreakerConfig) {
        *self = other;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncodingConfig {
    pub use_compact: bool,
}

impl EncodingConfig {
    fn merge(&mut self, other: EncodingConfig) {
        *self = other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.coordinator.max_iterations, 10);
        assert_eq!(config.subagent.max_recursion_depth, 2);
    }

    #[test]
    fn merge_overrides_with_other() {
        let mut config = RuntimeConfig::default();
        let mut other = RuntimeConfig::default();
        other.coordinator.max_iterations = 99;
        config.merge(other);
        assert_eq!(config.coordinator.max_iterations, 99);
    }

    #[test]
    fn toml_roundtrip() {
        let config = RuntimeConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rlm.toml");
        config.to_file(&path).unwrap();
        let loaded = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.coordinator.max_iterations, config.coordinator.max_iterations);
    }
}
