//! Model router: tier configuration + catalog snapshot → model id.
//!
//! Implements the literal selection algorithm of `spec.md` §4.5: pin
//! dominance, then filter, then sort by the tier's ordered preference
//! list, tie-broken by model id ascending. Selection is pure with
//! respect to its inputs (`spec.md` §8 property 3).

use std::cmp::Ordering;
use std::sync::Mutex;

use crate::config::{PreferenceKey, TierSettings};
use crate::error::RlmError;
use crate::types::ModelCatalogEntry;

pub struct ModelRouter;

impl ModelRouter {
    /// Selects a model id for `tier` out of `catalog` per `settings`.
    pub fn select(
        settings: &TierSettings,
        catalog: &[ModelCatalogEntry],
    ) -> Result<String, RlmError> {
        if let Some(ref pin) = settings.pin {
            if catalog.iter().any(|c| &c.id == pin) {
                return Ok(pin.clone());
            }
        }

        let mut candidates: Vec<&ModelCatalogEntry> = catalog
            .iter()
            .filter(|c| {
                settings
                    .min_context_window
                    .map(|min| c.context_window >= min)
                    .unwrap_or(true)
            })
            .filter(|c| {
                settings
                    .max_cost_per_million
                    .map(|max| c.average_cost_per_million() <= max)
                    .unwrap_or(true)
            })
            .filter(|c| {
                settings
                    .provider
                    .as_ref()
                    .map(|p| c.provider.as_str() == p)
                    .unwrap_or(true)
            })
            .filter(|c| settings.requires.iter().all(|tag| c.capabilities.contains(tag)))
            .collect();

        candidates.sort_by(|a, b| Self::compare(settings, a, b));

        candidates
            .first()
            .map(|c| c.id.clone())
            .ok_or(RlmError::NoCandidate)
    }

    fn compare(settings: &TierSettings, a: &ModelCatalogEntry, b: &ModelCatalogEntry) -> Ordering {
        for key in &settings.prefer {
            let ord = match key {
                PreferenceKey::Cost => a
                    .average_cost_per_million()
                    .partial_cmp(&b.average_cost_per_million())
                    .unwrap_or(Ordering::Equal),
                PreferenceKey::Quality => b.quality_score().cmp(&a.quality_score()),
                PreferenceKey::Latency => match (a.p50_latency_ms, b.p50_latency_ms) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => Ordering::Equal,
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }
}

/// Trivial selector returning the configured model id for sub-agent
/// execution; a default/unset selector returns the empty string and
/// treats `set_model` as always succeeding, per `spec.md` §4.5's
/// "nil receiver" companion.
pub struct ExecutionModelSelector {
    model: Mutex<String>,
}

impl ExecutionModelSelector {
    pub fn new() -> Self {
        Self {
            model: Mutex::new(String::new()),
        }
    }

    pub fn model_for(&self) -> String {
        self.model.lock().unwrap().clone()
    }

    pub fn set_model(&self, id: String) {
        *self.model.lock().unwrap() = id;
    }
}

impl Default for ExecutionModelSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::types::ProviderId;

    fn entry(id: &str, cw: u64, cost: f64, provider: &str, caps: &[&str]) -> ModelCatalogEntry {
        ModelCatalogEntry {
            id: id.to_string(),
            provider: ProviderId::from(provider),
            context_window: cw,
            prompt_price_per_million: cost,
            completion_price_per_million: cost,
            capabilities: caps.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            p50_latency_ms: None,
        }
    }

    #[test]
    fn s1_pin_dominance() {
        let catalog = vec![
            entry("a", 8000, 1.0, "p", &[]),
            entry("b", 16000, 1.0, "p", &[]),
        ];
        let settings = TierSettings {
            prefer: vec![PreferenceKey::Cost],
            pin: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(ModelRouter::select(&settings, &catalog).unwrap(), "b");
    }

    #[test]
    fn s2_constrained_filter() {
        let catalog = vec![
            entry("cheap-small", 4000, 0.2, "p", &[]),
            entry("expensive-large", 32000, 12.0, "p", &[]),
            entry("good-fit", 16000, 2.25, "p", &[]),
        ];
        let settings = TierSettings {
            prefer: vec![PreferenceKey::Cost],
            min_context_window: Some(8000),
            max_cost_per_million: Some(10.0),
            ..Default::default()
        };
        assert_eq!(ModelRouter::select(&settings, &catalog).unwrap(), "good-fit");
    }

    #[test]
    fn s3_capability_and_provider_filter() {
        let catalog = vec![
            entry("openrouter/reasoner", 100_000, 1.0, "openrouter", &["extended_thinking"]),
            entry("openai/fast", 32_000, 1.0, "openai", &[]),
        ];
        let settings = TierSettings {
            prefer: vec![PreferenceKey::Quality],
            provider: Some("openrouter".into()),
            requires: vec!["extended_thinking".into()],
            ..Default::default()
        };
        assert_eq!(
            ModelRouter::select(&settings, &catalog).unwrap(),
            "openrouter/reasoner"
        );
    }

    #[test]
    fn no_candidate_when_nothing_matches() {
        let catalog = vec![entry("a", 1000, 1.0, "p", &[])];
        let settings = TierSettings {
            min_context_window: Some(1_000_000),
            ..Default::default()
        };
        assert!(matches!(
            ModelRouter::select(&settings, &catalog),
            Err(RlmError::NoCandidate)
        ));
    }

    #[test]
    fn ties_break_lexicographically() {
        let catalog = vec![entry("zzz", 8000, 1.0, "p", &[]), entry("aaa", 8000, 1.0, "p", &[])];
        let settings = TierSettings {
            prefer: vec![PreferenceKey::Cost],
            ..Default::default()
        };
        assert_eq!(ModelRouter::select(&settings, &catalog).unwrap(), "aaa");
    }

    #[test]
    fn selection_is_deterministic() {
        let catalog = vec![entry("a", 8000, 1.0, "p", &[]), entry("b", 16000, 0.5, "p", &[])];
        let settings = TierSettings {
            prefer: vec![PreferenceKey::Cost],
            ..Default::default()
        };
        let first = ModelRouter::select(&settings, &catalog).unwrap();
        let second = ModelRouter::select(&settings, &catalog).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn execution_model_selector_defaults_to_empty() {
        let selector = ExecutionModelSelector::new();
        assert_eq!(selector.model_for(), "");
        selector.set_model("gpt".into());
        assert_eq!(selector.model_for(), "gpt");
    }
}
