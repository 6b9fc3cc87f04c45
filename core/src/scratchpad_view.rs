//! A time-bounded view over the scratchpad handed to one sub-agent.
//!
//! Enforces the sibling-isolation guarantee of `spec.md` §4.2/§8 property
//! 5: a sub-agent sees scratchpad entries strictly predating its batch's
//! admission instant and none of its siblings' in-flight writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::RlmError;
use crate::scratchpad::Scratchpad;
use crate::types::{EntryKey, ScratchpadEntry, WriteRequest};

#[derive(Clone)]
pub struct ScratchpadView {
    inner: Arc<Scratchpad>,
    visible_before: DateTime<Utc>,
}

impl ScratchpadView {
    /// A view with no cutoff: sees everything written so far. Used by
    /// the coordinator itself, which is never subject to sibling
    /// isolation.
    pub fn unbounded(inner: Arc<Scratchpad>) -> Self {
        Self {
            inner,
            visible_before: Utc::now(),
        }
    }

    pub fn bounded(inner: Arc<Scratchpad>, visible_before: DateTime<Utc>) -> Self {
        Self { inner, visible_before }
    }

    /// Writes are always visible to their own author going forward and
    /// never retroactively change what predates the cutoff.
    pub async fn write(&self, req: WriteRequest) -> Result<EntryKey, RlmError> {
        self.inner.write(req).await
    }

    pub async fn read(&self, key: &EntryKey) -> Result<ScratchpadEntry, RlmError> {
        let entry = self.inner.read(key).await?;
        if entry.created_at >= self.visible_before {
            return Err(RlmError::StorageError {
                message: format!("no entry for key {key}"),
            });
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::collab::StorageBackend;
    use crate::types::{AgentId, EntryKind, ListFilter};

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

    #[tokio::test]
    async fn sibling_cannot_see_in_flight_write() {
        let backend = Arc::new(MemoryBackend {
            entries: Mutex::new(HashMap::new()),
        });
        let pad = Arc::new(Scratchpad::new(backend));
        let cutoff = Utc::now();

        let view = ScratchpadView::bounded(pad.clone(), cutoff);
        let req = WriteRequest::new(EntryKind::SubAnswer, "from A", AgentId::new());
        let key_a = pad.write(req).await.unwrap();

        // key_a was written after the batch's cutoff, so a sibling's
        // bounded view must not see it.
        assert!(view.read(&key_a).await.is_err());
    }

    #[tokio::test]
    async fn pre_existing_entries_are_visible() {
        let backend = Arc::new(MemoryBackend {
            entries: Mutex::new(HashMap::new()),
        });
        let pad = Arc::new(Scratchpad::new(backend));
        let req = WriteRequest::new(EntryKind::Meta, "pre-existing", AgentId::new());
        let key = pad.write(req).await.unwrap();

        let cutoff = Utc::now();
        let view = ScratchpadView::bounded(pad.clone(), cutoff);
        assert!(view.read(&key).await.is_ok());
    }
}
