//! `TreeView(comparator, orderBy)` (§4.E): the root operator of every
//! pipeline, maintaining a sorted materialization of the final result with
//! an optional `limit` cutoff. A `delete` immediately followed by an `add`
//! of the same identity (the shape `Join`/`Reduce` emit for an edit) is
//! treated as a replace rather than two independent rebalances (§4.E, §9).

use std::cmp::Ordering;

use sync_ql::{FieldPath, OrderByItem, OrderDirection};

use crate::delta::{Delta, Node};

fn compare_by(order_by: &[OrderByItem], a: &Node, b: &Node) -> Ordering {
    for item in order_by {
        let av = a.field_value(&item.field);
        let bv = b.field_value(&item.field);
        let ord = match (av, bv) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        let ord = if item.direction == OrderDirection::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // Stable tiebreaker on primary key so equal-order rows still have a
    // total order (needed for a deterministic `limit` cutoff).
    a.value_identity().cmp(&b.value_identity())
}

/// The materialized, ordered result a client ultimately sees. Kept as a
/// sorted `Vec` with binary-search insert/remove — adequate at the row
/// counts a single CVR's queries deal with.
pub struct TreeView {
    order_by: Vec<OrderByItem>,
    limit: Option<usize>,
    rows: Vec<Node>,
}

impl TreeView {
    pub fn new(order_by: Vec<OrderByItem>, limit: Option<usize>) -> Self { Self { order_by, limit, rows: Vec::new() } }

    fn position(&self, node: &Node) -> Result<usize, usize> {
        self.rows.binary_search_by(|existing| compare_by(&self.order_by, existing, node))
    }

    fn insert(&mut self, node: Node) {
        match self.position(&node) {
            Ok(idx) => self.rows[idx] = node,
            Err(idx) => self.rows.insert(idx, node),
        }
        if let Some(limit) = self.limit {
            self.rows.truncate(limit);
        }
    }

    fn remove_matching(&mut self, node: &Node) {
        if let Some(idx) = self.rows.iter().position(|r| r.value_identity() == node.value_identity()) {
            self.rows.remove(idx);
        }
    }

    /// Apply an upstream delta. Adjacent `(remove X, add Y)` with
    /// `X.value_identity() == Y.value_identity()` is recognized as an
    /// update — a single O(log n) reposition instead of two rebalances.
    pub fn push(&mut self, delta: Delta) {
        let mut i = 0;
        while i < delta.len() {
            let entry = &delta[i];
            if entry.multiplicity < 0 {
                if let Some(next) = delta.get(i + 1) {
                    if next.multiplicity > 0 && next.node.value_identity() == entry.node.value_identity() {
                        self.remove_matching(&entry.node);
                        self.insert(next.node.clone());
                        i += 2;
                        continue;
                    }
                }
                self.remove_matching(&entry.node);
            } else if entry.multiplicity > 0 {
                self.insert(entry.node.clone());
            }
            i += 1;
        }
    }

    /// Current positive-multiplicity result, in declared order (§3
    /// "Multiset delta": "a view is the positive-multiplicity subset sorted
    /// by its declared order").
    pub fn rows(&self) -> &[Node] { &self.rows }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

/// Helper so callers building an `order_by` from a bare `FieldPath` list
/// (no explicit direction) get ascending order, matching a table's natural
/// primary-key order when no `ORDER BY` was declared (§3 `TableSchema`).
pub fn ascending(fields: impl IntoIterator<Item = FieldPath>) -> Vec<OrderByItem> {
    fields.into_iter().map(|field| OrderByItem { field, direction: OrderDirection::Asc }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaEntry;
    use sync_proto::{Row, Watermark};

    fn issue(id: i64, title: &str) -> Node {
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("title".into(), serde_json::json!(title));
        Node::new(r)
    }

    #[test]
    fn maintains_declared_order() {
        let mut tv = TreeView::new(ascending(["id".into()]), None);
        tv.push(vec![DeltaEntry::add(issue(3, "c")), DeltaEntry::add(issue(1, "a")), DeltaEntry::add(issue(2, "b"))]);
        let ids: Vec<_> = tv.rows().iter().map(|n| n.row.primary_key["id"].clone()).collect();
        assert_eq!(ids, vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
    }

    #[test]
    fn limit_zero_yields_empty_result() {
        let mut tv = TreeView::new(ascending(["id".into()]), Some(0));
        tv.push(vec![DeltaEntry::add(issue(1, "a"))]);
        assert!(tv.is_empty());
    }

    #[test]
    fn replace_pair_updates_in_place_without_reordering_other_rows() {
        let mut tv = TreeView::new(ascending(["id".into()]), None);
        tv.push(vec![DeltaEntry::add(issue(1, "a")), DeltaEntry::add(issue(2, "b"))]);
        tv.push(vec![DeltaEntry::remove(issue(1, "a")), DeltaEntry::add(issue(1, "a-renamed"))]);
        assert_eq!(tv.len(), 2);
        assert_eq!(tv.rows()[0].row.columns["title"], serde_json::json!("a-renamed"));
    }
}
