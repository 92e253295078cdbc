//! Minimal environment-variable configuration, in place of a
//! config-framework dependency (§SPEC_FULL "Configuration").

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};

use sync_proto::TableSchema;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9797";
const DEFAULT_REPLICA_VERSION: &str = "v1";

pub struct DurablePaths {
    pub change_log_path: String,
    pub replica_store_path: String,
    pub cvr_store_path: String,
}

pub struct Config {
    /// Logged but not connected to (out of scope, §1); present so a
    /// real logical-replication client has somewhere to read its
    /// connection string from once one is wired in.
    pub upstream_dsn: Option<String>,
    pub bind_address: String,
    pub replica_version: String,
    pub schema_catalog_path: Option<String>,
    durable_paths: Option<DurablePaths>,
    backoff_initial_ms: u64,
    backoff_cap_ms: u64,
}

impl Config {
    /// All three durable paths are optional together: set none for an
    /// ephemeral, in-memory deployment (tests, local demos), or all
    /// three for a durable one backed by `sync-storage-sled`. Setting
    /// only some is rejected rather than silently mixing durability
    /// levels across stores.
    pub fn from_env() -> Result<Self> {
        let change_log_path = env_var("CHANGE_LOG_PATH");
        let replica_store_path = env_var("REPLICA_STORE_PATH");
        let cvr_store_path = env_var("CVR_STORE_PATH");
        let durable_paths = match (change_log_path, replica_store_path, cvr_store_path) {
            (None, None, None) => None,
            (Some(change_log_path), Some(replica_store_path), Some(cvr_store_path)) => {
                Some(DurablePaths { change_log_path, replica_store_path, cvr_store_path })
            }
            _ => anyhow::bail!("CHANGE_LOG_PATH, REPLICA_STORE_PATH and CVR_STORE_PATH must be set together or not at all"),
        };

        Ok(Self {
            upstream_dsn: env_var("UPSTREAM_DSN"),
            bind_address: env_var("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            replica_version: env_var("REPLICA_VERSION").unwrap_or_else(|| DEFAULT_REPLICA_VERSION.to_string()),
            schema_catalog_path: env_var("SCHEMA_CATALOG_PATH"),
            durable_paths,
            backoff_initial_ms: env_var("BACKOFF_INITIAL_MS").map(|v| v.parse()).transpose().context("BACKOFF_INITIAL_MS")?.unwrap_or(100),
            backoff_cap_ms: env_var("BACKOFF_CAP_MS").map(|v| v.parse()).transpose().context("BACKOFF_CAP_MS")?.unwrap_or(10_000),
        })
    }

    pub fn is_durable(&self) -> bool { self.durable_paths.is_some() }

    pub fn durable_paths(&self) -> Option<&DurablePaths> { self.durable_paths.as_ref() }

    pub fn backoff_bounds(&self) -> (Duration, Duration) { (Duration::from_millis(self.backoff_initial_ms), Duration::from_millis(self.backoff_cap_ms)) }

    /// Loads the table catalog used to compile desired queries. Without
    /// `SCHEMA_CATALOG_PATH` the catalog starts empty; schemas then
    /// arrive only via `Change::CreateTable`/`Change::Relation` DDL
    /// events on the change stream, which this build's in-memory
    /// source never emits (§1 logical replication is out of scope).
    pub async fn load_schema_catalog(&self) -> Result<BTreeMap<String, TableSchema>> {
        let Some(path) = &self.schema_catalog_path else { return Ok(BTreeMap::new()) };
        let contents = tokio::fs::read_to_string(path).await.with_context(|| format!("reading schema catalog at {path}"))?;
        let tables: Vec<TableSchema> = serde_json::from_str(&contents).with_context(|| format!("parsing schema catalog at {path}"))?;
        Ok(tables.into_iter().map(|t| (t.name.clone(), t)).collect())
    }
}

fn env_var(name: &str) -> Option<String> { std::env::var(name).ok().filter(|s| !s.is_empty()) }
