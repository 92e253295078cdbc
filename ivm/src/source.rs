//! `Source` operator (§4.E): the leaf of every pipeline. Holds the current
//! materialized rows for one table in primary-key order (`BTreeMap` on
//! `RowKey` sorts lexicographically on `(schema, table, primary_key)`,
//! which coincides with primary-key order within one table — a plain
//! `BTreeMap` index, adequate at the scale one table's rows occupy).

use std::collections::BTreeMap;

use sync_proto::{Row, RowKey};

use crate::delta::{Delta, DeltaEntry, Node};

#[derive(Debug, Clone)]
pub enum RowChange {
    Add(Row),
    Remove(Row),
    /// A delete immediately followed by an add of the same identity within
    /// one commit — callers may also just send `Remove` + `Add` separately;
    /// `Source::apply` collapses either shape to the same net delta.
    Edit { old: Row, new: Row },
}

/// The one stateful leaf operator. Every other operator is pure given its
/// inputs; `Source` is where upstream `Change`s actually land (§4.E, §4.D).
#[derive(Debug, Default)]
pub struct Source {
    rows: BTreeMap<RowKey, Row>,
}

impl Source {
    pub fn new() -> Self { Self { rows: BTreeMap::new() } }

    /// Apply one commit's worth of row changes and return the delta to push
    /// downstream. Multiple changes to the same row within a commit net out
    /// per `collapse` (§4.E commutativity).
    pub fn push(&mut self, changes: Vec<RowChange>) -> Delta {
        let mut delta = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                RowChange::Add(row) => {
                    let key = row.key();
                    match self.rows.get(&key) {
                        // Already present with identical content: duplicate
                        // delivery, idempotent no-op.
                        Some(previous) if previous == &row => {}
                        // Already present with different content: an upstream
                        // `Update` surfaces here as a plain re-`Add` when the
                        // caller doesn't have the prior row handy, so replace
                        // rather than double-count it.
                        Some(previous) => {
                            delta.push(DeltaEntry::remove(Node::new(previous.clone())));
                            delta.push(DeltaEntry::add(Node::new(row.clone())));
                            self.rows.insert(key, row);
                        }
                        None => {
                            delta.push(DeltaEntry::add(Node::new(row.clone())));
                            self.rows.insert(key, row);
                        }
                    }
                }
                RowChange::Remove(row) => {
                    let key = row.key();
                    if let Some(old) = self.rows.remove(&key) {
                        delta.push(DeltaEntry::remove(Node::new(old)));
                    }
                }
                RowChange::Edit { old, new } => {
                    let old_key = old.key();
                    if let Some(existing) = self.rows.remove(&old_key) {
                        delta.push(DeltaEntry::remove(Node::new(existing)));
                    }
                    let new_key = new.key();
                    delta.push(DeltaEntry::add(Node::new(new.clone())));
                    self.rows.insert(new_key, new);
                }
            }
        }
        crate::delta::collapse(delta)
    }

    /// Full fetch for hydrate mode (§4.E): every currently materialized row
    /// as a `+1` delta, in primary-key order.
    pub fn hydrate(&self) -> Delta { self.rows.values().cloned().map(|r| DeltaEntry::add(Node::new(r))).collect() }

    pub fn get(&self, key: &RowKey) -> Option<&Row> { self.rows.get(key) }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::Watermark;

    fn row(id: i64, title: &str, w: &str) -> Row {
        let mut r = Row::new("public", "issues", Watermark::new(w));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("title".into(), serde_json::json!(title));
        r
    }

    #[test]
    fn insert_then_delete_round_trips_to_empty() {
        let mut source = Source::new();
        let r = row(1, "a", "w1");
        source.push(vec![RowChange::Add(r.clone())]);
        assert_eq!(source.len(), 1);
        source.push(vec![RowChange::Remove(r)]);
        assert!(source.is_empty());
    }

    #[test]
    fn edit_within_one_commit_emits_adjacent_replace_pair() {
        let mut source = Source::new();
        source.push(vec![RowChange::Add(row(1, "a", "w1"))]);
        let delta = source.push(vec![RowChange::Edit { old: row(1, "a", "w1"), new: row(1, "b", "w2") }]);
        // A delete immediately followed by an add of the same identity, per
        // the `TreeView` replace contract (§4.E) -- not a single net add.
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].multiplicity, -1);
        assert_eq!(delta[0].node.row.columns.get("title").unwrap(), &serde_json::json!("a"));
        assert_eq!(delta[1].multiplicity, 1);
        assert_eq!(delta[1].node.row.columns.get("title").unwrap(), &serde_json::json!("b"));
    }

    #[test]
    fn re_adding_an_existing_key_with_new_content_replaces_rather_than_doubles() {
        let mut source = Source::new();
        source.push(vec![RowChange::Add(row(1, "a", "w1"))]);
        let delta = source.push(vec![RowChange::Add(row(1, "b", "w2"))]);
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].multiplicity, -1);
        assert_eq!(delta[1].multiplicity, 1);
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn re_adding_an_existing_key_with_identical_content_is_a_no_op() {
        let mut source = Source::new();
        source.push(vec![RowChange::Add(row(1, "a", "w1"))]);
        let delta = source.push(vec![RowChange::Add(row(1, "a", "w1"))]);
        assert!(delta.is_empty());
    }

    #[test]
    fn hydrate_reflects_current_state_in_primary_key_order() {
        let mut source = Source::new();
        source.push(vec![RowChange::Add(row(2, "b", "w1")), RowChange::Add(row(1, "a", "w1"))]);
        let hydrated = source.hydrate();
        let ids: Vec<_> = hydrated.iter().map(|e| e.node.row.primary_key["id"].clone()).collect();
        assert_eq!(ids, vec![serde_json::json!(1), serde_json::json!(2)]);
    }
}
