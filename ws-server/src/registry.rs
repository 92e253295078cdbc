//! Lazily spawns and memoizes one View Syncer per client group (§4.H
//! "Per client-group"): the front door the Connection layer consults to
//! route `initConnection`/`changeDesiredQueries`/`push` to the task that
//! owns that group's CVR.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, warn};

use sync_cvr::CvrStore;
use sync_proto::{ClientGroupId, TableSchema, Watermark};
use sync_streamer::{ChangeLogStore, ChangeStreamerService, ReplicaStore, SubscribeRequest};
use sync_view_syncer::ViewSyncerHandle;

pub struct ViewSyncerRegistry<L, R, Cv> {
    streamer: ChangeStreamerService<L>,
    replica: Arc<R>,
    cvr_store: Arc<Cv>,
    tables: BTreeMap<String, TableSchema>,
    replica_version: String,
    syncers: Mutex<BTreeMap<ClientGroupId, ViewSyncerHandle>>,
}

impl<L, R, Cv> ViewSyncerRegistry<L, R, Cv>
where
    L: ChangeLogStore + 'static,
    R: ReplicaStore + 'static,
    Cv: CvrStore + 'static,
{
    /// Builds the registry and spawns the single background task that
    /// keeps the Replica Store (§4.D) caught up with the Change
    /// Streamer — the only writer to that store, per its own doc
    /// comment ("fed transactionally by the Change Streamer Service's
    /// apply path").
    pub fn new(
        streamer: ChangeStreamerService<L>, replica: Arc<R>, cvr_store: Arc<Cv>, tables: BTreeMap<String, TableSchema>,
        replica_version: impl Into<String>,
    ) -> Self {
        let replica_version = replica_version.into();
        let registry = Self { streamer, replica, cvr_store, tables, replica_version, syncers: Mutex::new(BTreeMap::new()) };
        registry.spawn_replica_feed();
        registry
    }

    fn spawn_replica_feed(&self) {
        let streamer = self.streamer.clone();
        let replica = self.replica.clone();
        let replica_version = self.replica_version.clone();
        tokio::spawn(async move {
            let (_id, mut commits) = match streamer
                .subscribe(SubscribeRequest { watermark: Watermark::zero(), replica_version, initial: true })
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "replica feed failed to subscribe to the change streamer");
                    return;
                }
            };
            while let Some(commit) = commits.next().await {
                if let Err(e) = replica.apply(commit.watermark, &commit.changes).await {
                    warn!(error = %e, "replica feed failed to apply a commit");
                }
            }
        });
    }

    /// Returns the running View Syncer for `group`, spawning it on
    /// first use. Cheap to call repeatedly: the handle is a clone of a
    /// single `mpsc::Sender` (§4.H).
    pub async fn get_or_create(&self, group: &ClientGroupId) -> ViewSyncerHandle {
        let mut syncers = self.syncers.lock().await;
        if let Some(handle) = syncers.get(group) {
            return handle.clone();
        }
        let handle = sync_view_syncer::spawn(
            group.clone(),
            self.tables.clone(),
            self.replica_version.clone(),
            self.streamer.clone(),
            self.replica.clone(),
            self.cvr_store.clone(),
        );
        syncers.insert(group.clone(), handle.clone());
        handle
    }
}
