//! Translates Change Streamer commits and replica snapshots into the
//! per-table `RowChange` batches IVM `Source` operators consume (§4.H
//! step 3a; §4.F/§4.H full-snapshot hydrate for a newly desired or
//! schema-recompiled query).

use std::collections::BTreeMap;

use sync_ivm::RowChange;
use sync_proto::{Change, TableSchema};
use sync_streamer::ReplicaStore;

/// Groups one commit's changes by table, translating each into the
/// `RowChange` vocabulary `Source::push` expects. DDL and transaction
/// framing carry no row data; DDL that affects an active query's columns
/// is handled by recompiling the pipeline from a fresh snapshot (§4.D,
/// §4.H), not by flowing through this per-commit path.
pub fn changes_to_row_changes(changes: &[Change]) -> BTreeMap<String, Vec<RowChange>> {
    let mut by_table: BTreeMap<String, Vec<RowChange>> = BTreeMap::new();
    for change in changes {
        match change {
            Change::Insert { table, row, .. } => by_table.entry(table.clone()).or_default().push(RowChange::Add(row.clone())),
            Change::Update { table, key, row } => {
                by_table.entry(table.clone()).or_default().push(RowChange::Edit { old: key.clone(), new: row.clone() })
            }
            Change::Delete { table, key, .. } => by_table.entry(table.clone()).or_default().push(RowChange::Remove(key.clone())),
            Change::Begin { .. }
            | Change::Commit
            | Change::Truncate { .. }
            | Change::Relation { .. }
            | Change::DropTable { .. }
            | Change::CreateTable { .. }
            | Change::AddColumn { .. }
            | Change::DropColumn { .. }
            | Change::UpdateColumn { .. }
            | Change::CreateIndex { .. }
            | Change::DropIndex { .. } => {}
        }
    }
    by_table
}

/// A full snapshot of every known table's current rows, as `+1` adds —
/// what a freshly compiled pipeline (a newly desired query, or one
/// recompiled after schema DDL removed a queried column) hydrates from
/// (§4.E "hydrate", §4.H "recompiles the pipeline at the commit
/// boundary", §9 "Schema-change handling").
pub async fn full_snapshot_changes(
    replica: &dyn ReplicaStore, tables: &BTreeMap<String, TableSchema>,
) -> anyhow::Result<BTreeMap<String, Vec<RowChange>>> {
    let mut snapshot = BTreeMap::new();
    for table in tables.keys() {
        let rows = replica.scan_table(table).await?;
        snapshot.insert(table.clone(), rows.into_iter().map(RowChange::Add).collect());
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::{Row, Watermark};

    fn row(id: i64) -> Row {
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r
    }

    #[test]
    fn insert_and_delete_are_grouped_per_table() {
        let changes = vec![
            Change::Begin { commit_watermark: Watermark::new("w1") },
            Change::Insert { schema: "public".into(), table: "issues".into(), row: row(1) },
            Change::Delete { schema: "public".into(), table: "issues".into(), key: row(2) },
            Change::Commit,
        ];
        let by_table = changes_to_row_changes(&changes);
        assert_eq!(by_table.get("issues").unwrap().len(), 2);
    }

    #[test]
    fn ddl_and_framing_produce_no_row_changes() {
        let changes = vec![Change::Begin { commit_watermark: Watermark::new("w1") }, Change::Commit];
        assert!(changes_to_row_changes(&changes).is_empty());
    }
}
