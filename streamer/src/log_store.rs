//! Change Log Store (§4.B): the durable, resumable, ordered log of
//! committed transactions. `append` is atomic per transaction; the
//! primary key is the watermark, so a retried append that collides
//! with an existing watermark is a no-op success (§4.B, §8 "duplicate
//! commit retry").

use async_trait::async_trait;

use sync_proto::{ChangeLogEntry, Watermark};

use crate::error::LogStoreError;

#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Appends one transaction's entries atomically. A watermark that
    /// already exists in the store is treated as success (§4.B, §8).
    async fn append(&self, entries: Vec<ChangeLogEntry>) -> Result<(), LogStoreError>;

    /// Resumable scan of `[from_watermark, latest]`, inclusive, in
    /// watermark order.
    async fn scan(&self, from_watermark: Watermark) -> Result<Vec<ChangeLogEntry>, LogStoreError>;

    async fn latest_watermark(&self) -> Result<Option<Watermark>, LogStoreError>;
}

/// In-memory reference implementation, used by the Change Streamer
/// Service's tests and by deployments that don't need cross-restart
/// durability (e.g. ephemeral demo mode).
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: tokio::sync::Mutex<std::collections::BTreeMap<Watermark, ChangeLogEntry>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl ChangeLogStore for InMemoryLogStore {
    async fn append(&self, entries: Vec<ChangeLogEntry>) -> Result<(), LogStoreError> {
        let mut store = self.entries.lock().await;
        for entry in entries {
            // Duplicate-key collision on a commit watermark means this
            // transaction was already persisted; treat as success.
            store.entry(entry.watermark.clone()).or_insert(entry);
        }
        Ok(())
    }

    async fn scan(&self, from_watermark: Watermark) -> Result<Vec<ChangeLogEntry>, LogStoreError> {
        let store = self.entries.lock().await;
        Ok(store.range(from_watermark..).map(|(_, v)| v.clone()).collect())
    }

    async fn latest_watermark(&self) -> Result<Option<Watermark>, LogStoreError> {
        let store = self.entries.lock().await;
        Ok(store.keys().next_back().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::Change;

    fn entry(w: &str) -> ChangeLogEntry { ChangeLogEntry { watermark: Watermark::new(w), change: Change::Commit } }

    #[tokio::test]
    async fn duplicate_append_of_an_existing_watermark_is_a_silent_success() {
        let store = InMemoryLogStore::new();
        store.append(vec![entry("1")]).await.unwrap();
        store.append(vec![entry("1")]).await.unwrap();
        let scanned = store.scan(Watermark::zero()).await.unwrap();
        assert_eq!(scanned.len(), 1);
    }

    #[tokio::test]
    async fn scan_resumes_from_the_requested_watermark_inclusive() {
        let store = InMemoryLogStore::new();
        store.append(vec![entry("1"), entry("2"), entry("3")]).await.unwrap();
        let scanned = store.scan(Watermark::new("2")).await.unwrap();
        assert_eq!(scanned.iter().map(|e| e.watermark.clone()).collect::<Vec<_>>(), vec![Watermark::new("2"), Watermark::new("3")]);
        assert_eq!(store.latest_watermark().await.unwrap(), Some(Watermark::new("3")));
    }
}
