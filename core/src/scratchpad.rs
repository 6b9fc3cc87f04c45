//! Typed, keyed artifact store with summary indexing.
//!
//! Generalizes `agent::tools::scratchpad::ScratchpadTool`'s single
//! `Arc<RwLock<String>>` buffer into the multi-entry, typed store
//! `spec.md` §4.4 requires, backed by an injectable `StorageBackend`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::collab::StorageBackend;
use crate::error::RlmError;
use crate::types::{EntryKey, ListFilter, ScratchpadEntry, WriteRequest};

/// In-memory summary index entry, kept alongside the durable backend so
/// listing/summarizing doesn't round-trip through storage on every call.
#[derive(Debug, Clone)]
struct IndexEntry {
    key: EntryKey,
    summary: String,
    created_at: chrono::DateTime<Utc>,
}

pub struct Scratchpad {
    backend: Arc<dyn StorageBackend>,
    index: RwLock<Vec<IndexEntry>>,
}

impl Scratchpad {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            index: RwLock::new(Vec::new()),
        }
    }

    /// Writes a new entry and returns its server-assigned key. Rejects a
    /// request whose summary is empty — the invariant in `spec.md` §3.
    pub async fn write(&self, req: WriteRequest) -> Result<EntryKey, RlmError> {
        if req.summary.trim().is_empty() {
            return Err(RlmError::Internal {
                message: "scratchpad entry summary must be non-empty".into(),
            });
        }
        let key = EntryKey::new();
        let entry = ScratchpadEntry {
            key: key.clone(),
            kind: req.kind,
            payload: req.payload,
            summary: req.summary,
            metadata: req.metadata,
            creator: req.creator,
            created_at: Utc::now(),
        };
        self.backend.put(&key, entry.clone()).await?;
        self.index.write().await.push(IndexEntry {
            key: key.clone(),
            summary: entry.summary,
            created_at: entry.created_at,
        });
        Ok(key)
    }

    pub async fn read(&self, key: &EntryKey) -> Result<ScratchpadEntry, RlmError> {
        self.backend.get(key).await?.ok_or_else(|| RlmError::StorageError {
            message: format!("no entry for key {key}"),
        })
    }

    /// Finite, non-restartable listing matching `filter`.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<ScratchpadEntry>, RlmError> {
        let mut entries = self.backend.list(filter).await?;
        entries.retain(|e| filter.matches(e));
        Ok(entries)
    }

    /// Returns an ordered subset of entries (most recent first) whose
    /// summaries fit within `budget_tokens`, using the same rough
    /// `len / 4` token estimator as the rest of the config surface (see
    /// `SPEC_FULL.md` §B).
    pub async fn summaries(&self, budget_tokens: u64) -> Vec<(EntryKey, String)> {
        let index = self.index.read().await;
        let mut ordered: Vec<&IndexEntry> = index.iter().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut out = Vec::new();
        let mut used = 0u64;
        for entry in ordered {
            let cost = (entry.summary.len() as u64 / 4).max(1);
            if used + cost > budget_tokens {
                break;
            }
            used += cost;
            out.push((entry.key.clone(), entry.summary.clone()));
        }
        out
    }

    /// Keys written since `since` (inclusive), used by the dispatcher to
    /// verify batch isolation in tests.
    pub async fn keys_since(&self, since: chrono::DateTime<Utc>) -> Vec<EntryKey> {
        self.index
            .read()
            .await
            .iter()
            .filter(|e| e.created_at >= since)
            .map(|e| e.key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::types::{AgentId, EntryKind};

    struct MemoryBackend {
        entries: Mutex<HashMap<String, ScratchpadEntry>>,
    }

    impl MemoryBackend {
        fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
            }
        }
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

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let pad = Scratchpad::new(Arc::new(MemoryBackend::new()));
        let req = WriteRequest::new(EntryKind::Artifact, "a summary", AgentId::new());
        let key = pad.write(req).await.unwrap();
        let entry = pad.read(&key).await.unwrap();
        assert_eq!(entry.summary, "a summary");
    }

    #[tokio::test]
    async fn empty_summary_is_rejected() {
        let pad = Scratchpad::new(Arc::new(MemoryBackend::new()));
        let req = WriteRequest::new(EntryKind::Meta, "  ", AgentId::new());
        assert!(pad.write(req).await.is_err());
    }

    #[tokio::test]
    async fn missing_key_is_storage_error() {
        let pad = Scratchpad::new(Arc::new(MemoryBackend::new()));
        let err = pad.read(&EntryKey::new()).await.unwrap_err();
        assert!(matches!(err, RlmError::StorageError { .. }));
    }

    #[tokio::test]
    async fn summaries_respect_token_budget() {
        let pad = Scratchpad::new(Arc::new(MemoryBackend::new()));
        for i in 0..5 {
            let req = WriteRequest::new(
                EntryKind::Analysis,
                format!("summary number {i} with some text"),
                AgentId::new(),
            );
            pad.write(req).await.unwrap();
        }
        let subset = pad.summaries(20).await;
        assert!(subset.len() < 5);
    }
}
