//! Sub-task descriptors dispatched to the worker pool.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ids::EntryKey;

/// Symbolic class selecting a model routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightTier {
    Light,
    Medium,
    Heavy,
    Reasoning,
}

/// One unit of delegated work. `prompt` must be non-empty; any
/// `allowed_tools` must all exist in the registry at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub prompt: String,
    pub allowed_tools: Option<HashSet<String>>,
    pub tier_hint: Option<WeightTier>,
    pub parent_key: Option<EntryKey>,
    /// Recursion depth this task is submitted at; the dispatcher fails
    /// admission past `max_recursion_depth`.
    #[serde(default)]
    pub depth: u32,
}

impl WeightTier {
    /// Stable lowercase key used wherever tiers are looked up in a
    /// string-keyed map (TOML tables require string keys).
    pub fn config_key(&self) -> &'static str {
        match self {
            WeightTier::Light => "light",
            WeightTier::Medium => "medium",
            WeightTier::Heavy => "heavy",
            WeightTier::Reasoning => "reasoning",
        }
    }
}

impl SubTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            allowed_tools: None,
            tier_hint: None,
            parent_key: None,
            depth: 0,
        }
    }

    pub fn is_tool_allowed(&self, name: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(set) => set.contains(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_whitelist_allows_any_tool() {
        let task = SubTask::new("do something");
        assert!(task.is_tool_allowed("anything"));
    }

    #[test]
    fn whitelist_restricts_tools() {
        let mut task = SubTask::new("inspect only");
        task.allowed_tools = Some(["inspect".to_string()].into_iter().collect());
        assert!(task.is_tool_allowed("inspect"));
        assert!(!task.is_tool_allowed("write_file"));
    }
}
