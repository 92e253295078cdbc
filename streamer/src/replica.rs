//! Replica Store (§4.D): an embedded row store fed transactionally by
//! the Change Streamer Service's apply path. View Syncers read it only
//! indirectly, through the IVM pipelines' `Source` operators, which
//! are hydrated from here at subscribe time.

use std::collections::BTreeMap;

use async_trait::async_trait;

use sync_proto::{Change, Row, RowKey, TableSchema, Watermark};

use crate::error::ReplicaError;

#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Applies one committed transaction's row changes and DDL,
    /// transactionally; each row's `row_version` is set to `watermark`
    /// (§4.D "_0_version").
    async fn apply(&self, watermark: Watermark, changes: &[Change]) -> Result<(), ReplicaError>;

    async fn schema(&self, table: &str) -> Result<Option<TableSchema>, ReplicaError>;

    async fn scan_table(&self, table: &str) -> Result<Vec<Row>, ReplicaError>;
}

/// In-memory reference implementation. `Source` operators hydrate from
/// this at subscribe time; the Change Streamer Service's apply path is
/// the only writer (§5 "Shared-resource policy").
#[derive(Default)]
pub struct InMemoryReplicaStore {
    inner: tokio::sync::Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    schemas: BTreeMap<String, TableSchema>,
    rows: BTreeMap<String, BTreeMap<RowKey, Row>>,
}

impl InMemoryReplicaStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl ReplicaStore for InMemoryReplicaStore {
    async fn apply(&self, watermark: Watermark, changes: &[Change]) -> Result<(), ReplicaError> {
        let mut inner = self.inner.lock().await;
        for change in changes {
            match change {
                Change::CreateTable { schema } | Change::Relation { schema } => {
                    inner.schemas.insert(schema.name.clone(), schema.clone());
                    inner.rows.entry(schema.name.clone()).or_default();
                }
                Change::DropTable { table, .. } => {
                    inner.schemas.remove(table);
                    inner.rows.remove(table);
                }
                Change::AddColumn { table, column, .. } | Change::UpdateColumn { table, column, .. } => {
                    if let Some(schema) = inner.schemas.get_mut(table) {
                        schema.columns.insert(column.name.clone(), column.clone());
                    }
                }
                Change::DropColumn { table, column, .. } => {
                    if let Some(schema) = inner.schemas.get_mut(table) {
                        schema.columns.remove(column);
                    }
                }
                Change::Insert { table, row, .. } | Change::Update { table, row, .. } => {
                    let mut row = row.clone();
                    row.row_version = watermark.clone();
                    let key = row.key();
                    inner.rows.entry(table.clone()).or_default().insert(key, row);
                }
                Change::Delete { table, key, .. } => {
                    if let Some(rows) = inner.rows.get_mut(table) {
                        rows.remove(&key.key());
                    }
                }
                Change::Truncate { table, .. } => {
                    if let Some(rows) = inner.rows.get_mut(table) {
                        rows.clear();
                    }
                }
                Change::CreateIndex { .. } | Change::DropIndex { .. } | Change::Begin { .. } | Change::Commit => {}
            }
        }
        Ok(())
    }

    async fn schema(&self, table: &str) -> Result<Option<TableSchema>, ReplicaError> {
        Ok(self.inner.lock().await.schemas.get(table).cloned())
    }

    async fn scan_table(&self, table: &str) -> Result<Vec<Row>, ReplicaError> {
        Ok(self.inner.lock().await.rows.get(table).map(|m| m.values().cloned().collect()).unwrap_or_default())
    }
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
        let store = InMemoryReplicaStore::new();
        store.apply(Watermark::new("w0"), &[Change::CreateTable { schema: schema() }]).await.unwrap();
        store.apply(Watermark::new("w5"), &[Change::Insert { schema: "public".into(), table: "issues".into(), row: row(1) }]).await.unwrap();
        let rows = store.scan_table("issues").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_version, Watermark::new("w5"));
    }

    #[tokio::test]
    async fn delete_removes_the_row_by_key() {
        let store = InMemoryReplicaStore::new();
        store.apply(Watermark::new("w0"), &[Change::CreateTable { schema: schema() }]).await.unwrap();
        store.apply(Watermark::new("w1"), &[Change::Insert { schema: "public".into(), table: "issues".into(), row: row(1) }]).await.unwrap();
        store.apply(Watermark::new("w2"), &[Change::Delete { schema: "public".into(), table: "issues".into(), key: row(1) }]).await.unwrap();
        assert!(store.scan_table("issues").await.unwrap().is_empty());
    }
}
