//! Durable `CvrStore` (§4.G, §6 `/vs/cvr/{group}/meta`) backed by a
//! single sled tree keyed by client-group id. One value per group holds
//! the whole bincode-encoded `Cvr`; `save` is a single tree insert so it
//! is atomic per group without a separate transaction (§4.G "all
//! transactional against the CVR's storage").

use async_trait::async_trait;
use sled::Tree;
use tokio::task;

use sync_cvr::{Cvr, CvrError, CvrStore};
use sync_proto::ClientGroupId;

use crate::error::SledError;

const TREE_NAME: &str = "cvr";

pub struct SledCvrStore {
    tree: Tree,
}

impl SledCvrStore {
    pub fn new(db: &sled::Db) -> Result<Self, SledError> { Ok(Self { tree: db.open_tree(TREE_NAME)? }) }
}

#[async_trait]
impl CvrStore for SledCvrStore {
    async fn load(&self, group: &ClientGroupId) -> Result<Cvr, CvrError> {
        let tree = self.tree.clone();
        let key = group.as_str().as_bytes().to_vec();
        let group = group.clone();
        task::spawn_blocking(move || -> Result<Cvr, SledError> {
            match tree.get(&key)? {
                Some(bytes) => Ok(bincode::deserialize(&bytes)?),
                None => Ok(Cvr::new(group)),
            }
        })
        .await
        .map_err(|e| CvrError::Backend(anyhow::anyhow!(e)))?
        .map_err(|e| CvrError::Backend(e.into()))
    }

    async fn save(&self, cvr: &Cvr) -> Result<(), CvrError> {
        let group = cvr.group.clone().expect("a saved CVR always has its owning group set");
        let key = group.as_str().as_bytes().to_vec();
        let value = bincode::serialize(cvr).map_err(|e| CvrError::Backend(SledError::from(e).into()))?;
        let tree = self.tree.clone();
        task::spawn_blocking(move || -> Result<(), SledError> {
            tree.insert(key, value)?;
            tree.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| CvrError::Backend(anyhow::anyhow!(e)))?
        .map_err(|e| CvrError::Backend(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::Watermark;

    #[tokio::test]
    async fn load_of_an_unknown_group_yields_an_empty_cvr() {
        let db = crate::open_temporary().unwrap();
        let store = SledCvrStore::new(&db).unwrap();
        let cvr = store.load(&ClientGroupId::from("g1")).await.unwrap();
        assert!(cvr.queries.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let db = crate::open_temporary().unwrap();
        let store = SledCvrStore::new(&db).unwrap();
        let mut cvr = Cvr::new(ClientGroupId::from("g1"));
        cvr.advance_version(Watermark::new("w5"));
        store.save(&cvr).await.unwrap();
        let reloaded = store.load(&ClientGroupId::from("g1")).await.unwrap();
        assert_eq!(reloaded.version.state_version, Some(Watermark::new("w5")));
    }
}
