//! `Join(parent, child, {parentKey, childKey, storage, relationshipName,
//! hidden, system})` (§4.E): an equijoin that maintains a child-side index
//! keyed by join column and annotates each matched parent row with
//! `relationships[name]`. `left` emits the parent row with an empty
//! relationships array when no child matches; `inner` drops unmatched
//! parent rows entirely.

use std::collections::BTreeMap;

use sync_proto::RowKey;
use sync_ql::{FieldPath, JoinKind, Value};

use crate::delta::{collapse, Delta, DeltaEntry, Node};

fn value_sort_key(v: &Value) -> String { serde_json::to_string(v).unwrap_or_default() }

/// Storage for one join's child-side index plus both sides' current
/// materialized rows, so a change on either side can recompute the
/// annotated parent (§4.E "Maintains a child-side index ... emits for each
/// matched parent row an annotated node").
pub struct Join {
    kind: JoinKind,
    parent_key: FieldPath,
    child_key: FieldPath,
    relationship_name: String,
    parents: BTreeMap<RowKey, Node>,
    children_by_key: BTreeMap<String, BTreeMap<RowKey, Node>>,
    parents_by_key: BTreeMap<String, std::collections::BTreeSet<RowKey>>,
}

impl Join {
    pub fn new(kind: JoinKind, parent_key: FieldPath, child_key: FieldPath, relationship_name: impl Into<String>) -> Self {
        Self {
            kind,
            parent_key,
            child_key,
            relationship_name: relationship_name.into(),
            parents: BTreeMap::new(),
            children_by_key: BTreeMap::new(),
            parents_by_key: BTreeMap::new(),
        }
    }

    fn matching_children(&self, key: &str) -> Vec<Node> { self.children_by_key.get(key).map(|m| m.values().cloned().collect()).unwrap_or_default() }

    fn annotate(&self, parent: &Node) -> Option<Node> {
        let key_value = parent.field_value(&self.parent_key)?;
        let key = value_sort_key(&key_value);
        let children = self.matching_children(&key);
        if self.kind == JoinKind::Inner && children.is_empty() {
            return None;
        }
        Some(parent.clone().with_relationship(self.relationship_name.clone(), children))
    }

    /// Feed a delta from the parent pipeline.
    pub fn push_parent(&mut self, delta: Delta) -> Delta {
        let mut out = Vec::new();
        for entry in delta {
            let row_key = entry.node.key();
            if entry.multiplicity > 0 {
                if let Some(kv) = entry.node.field_value(&self.parent_key) {
                    self.parents_by_key.entry(value_sort_key(&kv)).or_default().insert(row_key.clone());
                }
                self.parents.insert(row_key.clone(), entry.node.clone());
            } else {
                self.parents.remove(&row_key);
                if let Some(set) = self.parents_by_key.values_mut().find(|s| s.contains(&row_key)) {
                    set.remove(&row_key);
                }
            }
            if let Some(annotated) = self.annotate(&entry.node) {
                out.push(DeltaEntry { node: annotated, multiplicity: entry.multiplicity });
            }
        }
        collapse(out)
    }

    /// Feed a delta from the child pipeline; re-emits every affected parent
    /// row as a replace pair (remove stale annotation, add fresh one) so the
    /// root `TreeView` observes it as an update (§4.E, §9).
    pub fn push_child(&mut self, delta: Delta) -> Delta {
        let mut out = Vec::new();
        for entry in delta {
            let row_key = entry.node.key();
            let child_key_value = entry.node.field_value(&self.child_key);
            let Some(kv) = child_key_value else { continue };
            let k = value_sort_key(&kv);

            // Snapshot which parents match this key *before* mutating the
            // index, so a removal still finds its prior parents.
            let affected: Vec<RowKey> = self.parents_by_key.get(&k).map(|s| s.iter().cloned().collect()).unwrap_or_default();

            // Emit the stale annotation for every affected parent first.
            for parent_key in &affected {
                if let Some(parent) = self.parents.get(parent_key) {
                    if let Some(stale) = self.annotate(parent) {
                        out.push(DeltaEntry { node: stale, multiplicity: -1 });
                    }
                }
            }

            if entry.multiplicity > 0 {
                self.children_by_key.entry(k.clone()).or_default().insert(row_key.clone(), entry.node.clone());
            } else {
                self.children_by_key.entry(k.clone()).or_default().remove(&row_key);
            }

            for parent_key in &affected {
                if let Some(parent) = self.parents.get(parent_key) {
                    if let Some(fresh) = self.annotate(parent) {
                        out.push(DeltaEntry { node: fresh, multiplicity: 1 });
                    }
                }
            }
        }
        collapse(out)
    }

    /// Full fetch for hydrate mode: every currently known parent, annotated.
    pub fn hydrate(&self) -> Delta { self.parents.values().filter_map(|p| self.annotate(p)).map(DeltaEntry::add).collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::{Row, Watermark};

    fn issue(id: i64, owner_id: i64) -> Node {
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("owner_id".into(), serde_json::json!(owner_id));
        Node::new(r)
    }

    fn user(id: i64, name: &str) -> Node {
        let mut r = Row::new("public", "users", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("name".into(), serde_json::json!(name));
        Node::new(r)
    }

    #[test]
    fn left_join_emits_empty_relationships_when_no_child_matches() {
        let mut join = Join::new(JoinKind::Left, "owner_id".into(), "id".into(), "owner");
        let delta = join.push_parent(vec![DeltaEntry::add(issue(1, 42))]);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].node.relationships["owner"], Vec::<Node>::new());
    }

    #[test]
    fn inner_join_drops_unmatched_parent_until_child_arrives() {
        let mut join = Join::new(JoinKind::Inner, "owner_id".into(), "id".into(), "owner");
        let delta = join.push_parent(vec![DeltaEntry::add(issue(1, 42))]);
        assert!(delta.is_empty());

        let delta2 = join.push_child(vec![DeltaEntry::add(user(42, "alice"))]);
        assert_eq!(delta2.len(), 1);
        assert_eq!(delta2[0].node.relationships["owner"].len(), 1);
        assert_eq!(delta2[0].node.relationships["owner"][0].row.columns["name"], serde_json::json!("alice"));
    }

    #[test]
    fn child_update_re_emits_affected_parent_as_replace_pair() {
        let mut join = Join::new(JoinKind::Left, "owner_id".into(), "id".into(), "owner");
        join.push_parent(vec![DeltaEntry::add(issue(1, 42))]);
        join.push_child(vec![DeltaEntry::add(user(42, "alice"))]);

        let delta = join.push_child(vec![DeltaEntry::remove(user(42, "alice")), DeltaEntry::add(user(42, "alicia"))]);
        // stale (with "alice") removed, fresh (with "alicia") added
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].multiplicity, -1);
        assert_eq!(delta[1].multiplicity, 1);
        assert_eq!(delta[1].node.relationships["owner"][0].row.columns["name"], serde_json::json!("alicia"));
    }
}
