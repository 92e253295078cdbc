//! Durable CVR storage (§4.G "all transactional against the CVR's
//! storage", §6 persistent layout). `sync-storage-sled` provides the
//! durable implementation; `InMemoryCvrStore` backs unit tests and the
//! `server` binary's ephemeral mode.

use async_trait::async_trait;
use tokio::sync::Mutex;

use sync_proto::ClientGroupId;

use crate::error::CvrError;
use crate::model::Cvr;

#[async_trait]
pub trait CvrStore: Send + Sync {
    /// `load(id) -> CVR` (§4.G). A group with no prior record loads as
    /// an empty `Cvr`.
    async fn load(&self, group: &ClientGroupId) -> Result<Cvr, CvrError>;

    /// Persists the full CVR, transactionally, for the given group
    /// (§4.G "all transactional against the CVR's storage").
    async fn save(&self, cvr: &Cvr) -> Result<(), CvrError>;
}

#[derive(Default)]
pub struct InMemoryCvrStore {
    records: Mutex<std::collections::BTreeMap<ClientGroupId, Cvr>>,
}

impl InMemoryCvrStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl CvrStore for InMemoryCvrStore {
    async fn load(&self, group: &ClientGroupId) -> Result<Cvr, CvrError> {
        let records = self.records.lock().await;
        Ok(records.get(group).cloned().unwrap_or_else(|| Cvr::new(group.clone())))
    }

    async fn save(&self, cvr: &Cvr) -> Result<(), CvrError> {
        let group = cvr.group.clone().expect("a saved CVR always has its owning group set");
        self.records.lock().await.insert(group, cvr.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_of_an_unknown_group_yields_an_empty_cvr() {
        let store = InMemoryCvrStore::new();
        let cvr = store.load(&ClientGroupId::from("g1")).await.unwrap();
        assert!(cvr.queries.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCvrStore::new();
        let mut cvr = Cvr::new(ClientGroupId::from("g1"));
        cvr.advance_version(sync_proto::Watermark::new("w5"));
        store.save(&cvr).await.unwrap();
        let reloaded = store.load(&ClientGroupId::from("g1")).await.unwrap();
        assert_eq!(reloaded.version.state_version, Some(sync_proto::Watermark::new("w5")));
    }
}
