//! Change Streamer Service (§4.C): the single serializer of upstream
//! order. Buffers incoming messages by transaction, persists each
//! commit to the Change Log Store before ACKing upstream, and
//! broadcasts it to every live subscriber exactly once in watermark
//! order. New subscribers are caught up from the store and spliced
//! into the live broadcast with no gap and no duplicate.
//!
//! A single serializing lock (`commit_lock`) guards both "persist a
//! commit and fan it out" and "catch up a new subscriber", so the
//! splice point always lands exactly on the next commit after what
//! catch-up scanned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use sync_proto::{Change, Watermark};

use crate::backoff::Backoff;
use crate::cancellable::{cancel_pair, CancelSignal, CancelToken};
use crate::error::StreamError;
use crate::log_store::ChangeLogStore;
use crate::source::ChangeSource;

/// One committed upstream transaction, reassembled from `Begin..Commit`
/// framing, handed to a subscriber (typically a View Syncer, §4.H step
/// 3a) to feed into its pipelines.
#[derive(Debug, Clone)]
pub struct Commit {
    pub watermark: Watermark,
    pub changes: Vec<Change>,
}

pub struct SubscribeRequest {
    pub watermark: Watermark,
    pub replica_version: String,
    /// No prior state: the subscriber expects a full catch-up starting
    /// at `watermark` (§4.C).
    pub initial: bool,
}

pub type SubscriberId = u64;

/// A cancellable async sequence of `Commit`s (§4.C `subscribe`).
pub struct CommitStream {
    rx: mpsc::Receiver<Commit>,
    cancel: CancelToken,
}

impl CommitStream {
    pub async fn next(&mut self) -> Option<Commit> { self.rx.recv().await }

    pub fn cancel(&self) { self.cancel.cancel(); }
}

const SUBSCRIBER_BUFFER: usize = 256;

struct Inner<L: ChangeLogStore> {
    log_store: L,
    replica_version: String,
    /// Serializes "persist a commit and fan it out" against "catch up a
    /// new subscriber", so the splice point is always exactly the next
    /// commit after what catch-up scanned — no gap, no duplicate.
    commit_lock: Mutex<()>,
    subscribers: DashMap<SubscriberId, mpsc::Sender<Commit>>,
    next_subscriber_id: AtomicU64,
}

/// Owns the Change Log Store and the live subscriber fan-out. One
/// instance per upstream replica (§4.C).
pub struct ChangeStreamerService<L: ChangeLogStore> {
    inner: Arc<Inner<L>>,
}

impl<L: ChangeLogStore> Clone for ChangeStreamerService<L> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<L: ChangeLogStore + 'static> ChangeStreamerService<L> {
    pub fn new(log_store: L, replica_version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                log_store,
                replica_version: replica_version.into(),
                commit_lock: Mutex::new(()),
                subscribers: DashMap::new(),
                next_subscriber_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber, catching it up from the store and
    /// splicing it into the live broadcast with no gap or duplicate
    /// (§4.C algorithm step 2).
    pub async fn subscribe(&self, req: SubscribeRequest) -> Result<(SubscriberId, CommitStream), StreamError> {
        if req.replica_version != self.inner.replica_version {
            return Err(StreamError::ReplicaVersionMismatch { expected: self.inner.replica_version.clone(), got: req.replica_version });
        }
        debug!(watermark = %req.watermark, initial = req.initial, "streamer subscribe");

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (cancel_tok, _cancel_sig) = cancel_pair();

        // Hold the commit lock across "scan the store" + "register the
        // live subscriber" so no commit can land in the gap between them.
        let _guard = self.inner.commit_lock.lock().await;
        let catchup = self.inner.log_store.scan(req.watermark).await?;
        for commit in group_into_commits(catchup) {
            // Catch-up is best-effort against the bound: a subscriber
            // that can't absorb its own catch-up is cancelled same as a
            // slow live consumer (§4.C "Failure semantics").
            if tx.try_send(commit).is_err() {
                return Err(StreamError::SubscriberOverflow);
            }
        }

        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.insert(id, tx);
        Ok((id, CommitStream { rx, cancel: cancel_tok }))
    }

    pub fn unsubscribe(&self, id: SubscriberId) { self.inner.subscribers.remove(&id); }

    /// Persist one committed transaction and fan it out to every live
    /// subscriber exactly once, in watermark order (§4.C algorithm step
    /// 1). A subscriber whose buffer is full is cancelled rather than
    /// allowed to stall the others (§4.C "Failure semantics").
    async fn land_commit(&self, commit: Commit, source_entries: Vec<sync_proto::ChangeLogEntry>) -> Result<(), StreamError> {
        let _guard = self.inner.commit_lock.lock().await;
        self.inner.log_store.append(source_entries).await?;

        let mut dead = Vec::new();
        for entry in self.inner.subscribers.iter() {
            if entry.value().try_send(commit.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            warn!(subscriber = id, "subscriber buffer overflow, cancelling");
            self.inner.subscribers.remove(&id);
        }
        Ok(())
    }

    /// Drives the service: reads from `source` with reconnect/backoff,
    /// reassembles transactions, persists and fans each out. Runs until
    /// cancelled or a fatal source error occurs (§4.A, §4.C).
    ///
    /// `backoff_bounds` is `(initial, cap)`; pass `Backoff::default()`'s
    /// bounds (100ms, 10s) when the deployment has no opinion.
    pub async fn run(
        &self, source: Arc<dyn ChangeSource>, mut from_watermark: Watermark, backoff_bounds: (std::time::Duration, std::time::Duration),
        cancel: CancelSignal,
    ) -> Result<(), StreamError> {
        let mut backoff = Backoff::new(backoff_bounds.0, backoff_bounds.1);
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let (mut stream, acks) = match source.start_stream(from_watermark.clone()).await {
                Ok(pair) => pair,
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next();
                    warn!(error = %e, delay_ms = delay.as_millis(), "change source disconnected, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut pending: Vec<Change> = Vec::new();
            let mut pending_entries: Vec<sync_proto::ChangeLogEntry> = Vec::new();
            loop {
                match stream.next().await {
                    Some(Ok(entry)) => {
                        backoff.reset();
                        let is_commit = entry.is_commit();
                        let watermark = entry.watermark.clone();
                        pending.push(entry.change.clone());
                        pending_entries.push(entry);
                        if is_commit {
                            let commit = Commit { watermark: watermark.clone(), changes: std::mem::take(&mut pending) };
                            let entries = std::mem::take(&mut pending_entries);
                            self.land_commit(commit, entries).await?;
                            acks.ack(watermark.clone());
                            from_watermark = watermark;
                        }
                    }
                    Some(Err(e)) if e.is_retryable() => {
                        let delay = backoff.next();
                        warn!(error = %e, delay_ms = delay.as_millis(), "change stream error, reconnecting");
                        tokio::time::sleep(delay).await;
                        break;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
        }
    }
}

/// Groups a flat, watermark-ordered scan of log entries back into
/// per-transaction `Commit`s for catch-up delivery.
fn group_into_commits(entries: Vec<sync_proto::ChangeLogEntry>) -> Vec<Commit> {
    let mut commits = Vec::new();
    let mut current = Vec::new();
    for entry in entries {
        let is_commit = entry.is_commit();
        let watermark = entry.watermark.clone();
        current.push(entry.change);
        if is_commit {
            commits.push(Commit { watermark, changes: std::mem::take(&mut current) });
        }
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::InMemoryLogStore;
    use crate::source::InMemoryChangeSource;
    use sync_proto::ChangeLogEntry;

    fn txn(w: &str, table: &str, id: i64) -> Vec<ChangeLogEntry> {
        let mut row = sync_proto::Row::new("public", table, Watermark::new(w));
        row.primary_key.insert("id".into(), serde_json::json!(id));
        vec![
            ChangeLogEntry::new(Watermark::new(w), Change::Insert { schema: "public".into(), table: table.into(), row }),
            ChangeLogEntry::new(Watermark::new(w), Change::Commit),
        ]
    }

    #[tokio::test]
    async fn subscriber_receives_catchup_then_is_registered_for_live_commits() {
        let store = InMemoryLogStore::new();
        store.append(txn("1", "issues", 1)).await.unwrap();
        let service = ChangeStreamerService::new(store, "v1");

        let (_id, mut stream) = service
            .subscribe(SubscribeRequest { watermark: Watermark::zero(), replica_version: "v1".into(), initial: true })
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.watermark, Watermark::new("1"));
    }

    #[tokio::test]
    async fn replica_version_mismatch_is_rejected() {
        let store = InMemoryLogStore::new();
        let service = ChangeStreamerService::new(store, "v1");
        let err = service
            .subscribe(SubscribeRequest { watermark: Watermark::zero(), replica_version: "v2".into(), initial: true })
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::ReplicaVersionMismatch { .. }));
    }

    #[tokio::test]
    async fn run_drives_commits_from_source_to_subscribers() {
        let store = InMemoryLogStore::new();
        let service = ChangeStreamerService::new(store, "v1");
        let (_id, mut stream) = service
            .subscribe(SubscribeRequest { watermark: Watermark::zero(), replica_version: "v1".into(), initial: true })
            .await
            .unwrap();

        let entries = txn("5", "issues", 1);
        let source: Arc<dyn ChangeSource> = Arc::new(InMemoryChangeSource::new(entries));
        let (_tok, sig) = cancel_pair();
        let service_bg = service.clone();
        // The in-memory source is finite; once exhausted `run` would busy-loop
        // reconnecting to it forever the way a real disconnect would, so the
        // driving task is aborted once the single expected commit lands.
        let bounds = (std::time::Duration::from_millis(100), std::time::Duration::from_secs(10));
        let handle = tokio::spawn(async move { service_bg.run(source, Watermark::zero(), bounds, sig).await });

        let commit = stream.next().await.unwrap();
        assert_eq!(commit.watermark, Watermark::new("5"));
        handle.abort();
    }
}
