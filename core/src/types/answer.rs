//! The coordinator's evolving response object.

use serde::{Deserialize, Serialize};

use super::ids::EntryKey;

/// The coordinator's accumulating response. Owned exclusively by the
/// coordinator for the lifetime of one `execute_top`/`execute_task` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub content: String,
    pub ready: bool,
    confidence: f64,
    pub artifact_keys: Vec<EntryKey>,
    pub next_steps: Vec<String>,
    pub iteration: u32,
    pub tokens_used: u64,
}

impl Answer {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            ready: false,
            confidence: 0.0,
            artifact_keys: Vec::new(),
            next_steps: Vec::new(),
            iteration: 0,
            tokens_used: 0,
        }
    }

    /// Confidence is always read back clamped to `[0, 1]`, regardless of
    /// what was last written with `set_confidence`.
    pub fn confidence(&self) -> f64 {
        self.confidence.clamp(0.0, 1.0)
    }

    pub fn set_confidence(&mut self, value: f64) {
        self.confidence = value.clamp(0.0, 1.0);
    }

    /// Advances `iteration`, enforcing monotonic non-decrease.
    pub fn advance_iteration(&mut self, i: u32) {
        if i > self.iteration {
            self.iteration = i;
        }
    }

    pub fn add_tokens(&mut self, n: u64) {
        self.tokens_used += n;
    }

    /// Strips anything that looks like a leaked wire-format fragment
    /// (a JSON object/array or a `<tool_call>`-style tag) before the
    /// content is handed to a caller outside the loop.
    pub fn sanitized_content(&self) -> String {
        let trimmed = self.content.trim();
        let looks_like_fragment = (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
            || trimmed.starts_with('<');
        if looks_like_fragment {
            String::new()
        } else {
            self.content.clone()
        }
    }

    /// Marks the answer as a non-terminal failure with a human-readable
    /// annotation, used on budget exhaustion or cancellation.
    pub fn annotate_failure(&mut self, reason: &str) {
        self.ready = false;
        if self.content.is_empty() {
            self.content = reason.to_string();
        } else {
            self.content = format!("{}\n\n[{}]", self.content, reason);
        }
    }
}

impl Default for Answer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let mut a = Answer::new();
        a.set_confidence(1.5);
        assert_eq!(a.confidence(), 1.0);
        a.set_confidence(-0.2);
        assert_eq!(a.confidence(), 0.0);
    }

    #[test]
    fn iteration_never_decreases() {
        let mut a = Answer::new();
        a.advance_iteration(3);
        a.advance_iteration(1);
        assert_eq!(a.iteration, 3);
    }

    #[test]
    fn sanitizes_json_looking_content() {
        let mut a = Answer::new();
        a.content = r#"{"tool_call": "foo"}"#.to_string();
        assert_eq!(a.sanitized_content(), "");
    }

    #[test]
    fn keeps_plain_text_content() {
        let mut a = Answer::new();
        a.content = "the answer is 42".to_string();
        assert_eq!(a.sanitized_content(), "the answer is 42");
    }
}
