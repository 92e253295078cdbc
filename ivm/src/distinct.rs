//! `Concat` and `Distinct` operators (§4.E operator set, §4.F step 3):
//! an `OR` where-clause compiles to one filtered branch per disjunct,
//! concatenated and deduplicated so a row matching more than one disjunct
//! is not emitted twice. `distinct(col)` compiles to the same `Distinct`
//! operator keyed by a column instead of the whole row.

use std::collections::BTreeMap;

use sync_ql::FieldPath;

use crate::delta::{collapse, Delta, DeltaEntry, Node};

/// Concatenates deltas from N upstream branches, in declaration order.
/// Pure — no state of its own, the dedup logic lives in `Distinct`.
pub fn concat(branches: Vec<Delta>) -> Delta { collapse(branches.into_iter().flatten().collect()) }

fn distinct_key(node: &Node, on: Option<&FieldPath>) -> String {
    match on {
        Some(field) => serde_json::to_string(&node.field_value(field)).unwrap_or_default(),
        None => node.value_identity(),
    }
}

/// Deduplicates a stream on `on` (or the whole row identity when `on` is
/// `None`): only the first-seen member of each key is emitted; a
/// `DISTINCT ON` replacement (new winner for an already-occupied key)
/// surfaces as a replace pair, matching `TreeView`'s replace contract.
pub struct Distinct {
    on: Option<FieldPath>,
    seen: BTreeMap<String, Node>,
}

impl Distinct {
    pub fn new(on: Option<FieldPath>) -> Self { Self { on, seen: BTreeMap::new() } }

    pub fn push(&mut self, delta: Delta) -> Delta {
        let mut out = Vec::new();
        for entry in delta {
            let key = distinct_key(&entry.node, self.on.as_ref());
            if entry.multiplicity > 0 {
                if let Some(existing) = self.seen.get(&key) {
                    if existing.value_identity() != entry.node.value_identity() {
                        // a different row now wins this distinct key
                        out.push(DeltaEntry::remove(existing.clone()));
                        out.push(DeltaEntry::add(entry.node.clone()));
                        self.seen.insert(key, entry.node);
                    }
                    // same row re-affirmed: no-op
                } else {
                    out.push(DeltaEntry::add(entry.node.clone()));
                    self.seen.insert(key, entry.node);
                }
            } else if let Some(existing) = self.seen.get(&key) {
                if existing.value_identity() == entry.node.value_identity() {
                    out.push(DeltaEntry::remove(entry.node.clone()));
                    self.seen.remove(&key);
                }
            }
        }
        collapse(out)
    }

    pub fn hydrate(&self) -> Delta { self.seen.values().cloned().map(DeltaEntry::add).collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::{Row, Watermark};

    fn issue(id: i64) -> Node {
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        Node::new(r)
    }

    #[test]
    fn concat_then_distinct_drops_duplicate_matches_from_or_branches() {
        let branch_a = vec![DeltaEntry::add(issue(1)), DeltaEntry::add(issue(2))];
        let branch_b = vec![DeltaEntry::add(issue(2)), DeltaEntry::add(issue(3))];
        let concatenated = concat(vec![branch_a, branch_b]);

        let mut distinct = Distinct::new(None);
        let result = distinct.push(concatenated);
        let ids: Vec<_> = result.iter().map(|e| e.node.row.primary_key["id"].clone()).collect();
        assert_eq!(ids, vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
    }
}
