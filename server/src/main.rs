//! Boots the whole sync backend: Change Streamer Service, Replica
//! Store, CVR store, View Syncer registry, and the `/ws` Connection
//! endpoint, wired from environment configuration.

mod config;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn, Level};

use sync_cvr::InMemoryCvrStore;
use sync_proto::Watermark;
use sync_streamer::{cancel_pair, ChangeSource, ChangeStreamerService, InMemoryChangeSource, InMemoryLogStore, InMemoryReplicaStore};
use sync_ws_server::{ViewSyncerRegistry, WebsocketServer};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Config::from_env().context("loading configuration from the environment")?;
    info!(bind = %config.bind_address, durable = config.is_durable(), "starting sync server");

    let tables = config.load_schema_catalog().await.context("loading schema catalog")?;

    if config.upstream_dsn.is_some() {
        warn!("UPSTREAM_DSN is set, but this build has no logical-replication client wired in (out of scope, §1); running against the in-memory change source instead");
    }

    let source: Arc<dyn ChangeSource> = Arc::new(InMemoryChangeSource::new(Vec::new()));

    if let Some(paths) = config.durable_paths() {
        let change_log_db = sync_storage_sled::open(&paths.change_log_path)?;
        let log_store = sync_storage_sled::SledChangeLogStore::new(&change_log_db)?;

        let replica_db = sync_storage_sled::open(&paths.replica_store_path)?;
        let replica = Arc::new(sync_storage_sled::SledReplicaStore::new(&replica_db)?);
        sync_storage_sled::seed_schemas(&replica, &tables).await?;

        let cvr_db = sync_storage_sled::open(&paths.cvr_store_path)?;
        let cvr_store = Arc::new(sync_storage_sled::SledCvrStore::new(&cvr_db)?);

        run_server(config, tables, log_store, replica, cvr_store, source).await
    } else {
        let log_store = InMemoryLogStore::new();
        let replica = Arc::new(InMemoryReplicaStore::new());
        let cvr_store = Arc::new(InMemoryCvrStore::new());
        run_server(config, tables, log_store, replica, cvr_store, source).await
    }
}

async fn run_server<L, R, Cv>(
    config: Config, tables: BTreeMap<String, sync_proto::TableSchema>, log_store: L, replica: Arc<R>, cvr_store: Arc<Cv>,
    source: Arc<dyn ChangeSource>,
) -> Result<()>
where
    L: sync_streamer::ChangeLogStore + 'static,
    R: sync_streamer::ReplicaStore + 'static,
    Cv: sync_cvr::CvrStore + 'static,
{
    let streamer = ChangeStreamerService::new(log_store, config.replica_version.clone());

    let (_cancel_token, cancel_signal) = cancel_pair();
    let driver = streamer.clone();
    let backoff_bounds = config.backoff_bounds();
    tokio::spawn(async move {
        if let Err(e) = driver.run(source, Watermark::zero(), backoff_bounds, cancel_signal).await {
            tracing::error!(error = %e, "change streamer service exited");
        }
    });

    let registry = ViewSyncerRegistry::new(streamer, replica, cvr_store, tables, config.replica_version.clone());
    let mut server = WebsocketServer::new(registry);
    server.run(&config.bind_address).await
}
