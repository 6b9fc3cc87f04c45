//! Scratchpad data shapes: entries, write requests, and list filters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, EntryKey};

/// Closed set of scratchpad entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Analysis,
    Artifact,
    PlanNote,
    ToolOutput,
    SubAnswer,
    Meta,
}

/// A single immutable scratchpad entry. Server-assigned `key`, non-empty
/// `summary`, lowercase-token `metadata` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub key: EntryKey,
    pub kind: EntryKind,
    pub payload: Vec<u8>,
    pub summary: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub creator: AgentId,
    pub created_at: DateTime<Utc>,
}

/// Request to write a new entry. Never carries a key — the scratchpad
/// assigns one.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub kind: EntryKind,
    pub payload: Vec<u8>,
    pub summary: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub creator: AgentId,
}

impl WriteRequest {
    pub fn new(kind: EntryKind, summary: impl Into<String>, creator: AgentId) -> Self {
        Self {
            kind,
            payload: Vec::new(),
            summary: summary.into(),
            metadata: BTreeMap::new(),
            creator,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Keys are lowercased on insertion so the invariant holds regardless
    /// of what the caller passes in.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into().to_lowercase(), value);
        self
    }
}

/// Predicates for `Scratchpad::list`. All present predicates are
/// conjunctive (AND).
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kind: Option<EntryKind>,
    pub creator: Option<AgentId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub metadata_equals: Option<(String, serde_json::Value)>,
}

impl ListFilter {
    pub fn matches(&self, entry: &ScratchpadEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(ref creator) = self.creator {
            if &entry.creator != creator {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if entry.created_at <= after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if entry.created_at >= before {
                return false;
            }
        }
        if let Some((ref key, ref value)) = self.metadata_equals {
            match entry.metadata.get(key) {
                Some(v) if v == value => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> ScratchpadEntry {
        ScratchpadEntry {
            key: EntryKey::new(),
            kind: EntryKind::Artifact,
            payload: vec![],
            summary: "s".into(),
            metadata: BTreeMap::new(),
            creator: AgentId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matches_on_kind() {
        let entry = sample_entry();
        let filter = ListFilter {
            kind: Some(EntryKind::Artifact),
            ..Default::default()
        };
        assert!(filter.matches(&entry));
        let filter = ListFilter {
            kind: Some(EntryKind::Meta),
            ..Default::default()
        };
        assert!(!filter.matches(&entry));
    }

    #[test]
    fn metadata_keys_are_lowercased() {
        let req = WriteRequest::new(EntryKind::Meta, "s", AgentId::new())
            .with_metadata("SourceFile", serde_json::json!("a.rs"));
        assert!(req.metadata.contains_key("sourcefile"));
    }
}
