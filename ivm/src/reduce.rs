//! `Reduce(groupKey, valueIdentity, combiner)` (§4.E): groups incoming rows
//! by `groupKey`, emits one row per group, retracts on emptiness. The
//! combiner runs lazily — only when the downstream actually pulls — and
//! group membership is materialized into an immutable slice at pull time so
//! re-iterating a yielded group is restartable and deterministic (§4.E,
//! §9 "Lazy iteration of grouped reductions").

use std::collections::BTreeMap;

use sync_proto::{Row, Watermark};
use sync_ql::{AggregateExpr, AggregateFunc, FieldPath, Value};

use crate::delta::{collapse, Delta, DeltaEntry, Node};

/// A group's current membership, keyed by each member's `valueIdentity` so
/// a replace (delete+add of the same identity) updates the group correctly
/// rather than leaving a stale duplicate (§4.E).
#[derive(Default)]
struct Group {
    members: BTreeMap<String, Node>,
}

pub struct Reduce {
    group_by: Vec<FieldPath>,
    aggregates: Vec<AggregateExpr>,
    groups: BTreeMap<String, Group>,
    /// Output table/schema identity stamped on synthesized aggregate rows.
    schema: String,
    table: String,
}

fn group_key(row: &Node, group_by: &[FieldPath]) -> String {
    let values: Vec<Value> = group_by.iter().map(|f| row.field_value(f).unwrap_or(Value::Null)).collect();
    serde_json::to_string(&values).unwrap_or_default()
}

fn apply_aggregate(func: AggregateFunc, field: Option<&FieldPath>, members: &[&Node]) -> serde_json::Value {
    match func {
        AggregateFunc::Count => serde_json::json!(members.len() as i64),
        AggregateFunc::Sum | AggregateFunc::Avg | AggregateFunc::Min | AggregateFunc::Max => {
            let Some(field) = field else { return serde_json::Value::Null };
            let nums: Vec<f64> = members.iter().filter_map(|m| m.field_value(field)).filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                return serde_json::Value::Null;
            }
            let result = match func {
                AggregateFunc::Sum => nums.iter().sum(),
                AggregateFunc::Avg => nums.iter().sum::<f64>() / nums.len() as f64,
                AggregateFunc::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
                AggregateFunc::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                _ => unreachable!(),
            };
            serde_json::json!(result)
        }
        AggregateFunc::Array => {
            let Some(field) = field else { return serde_json::Value::Null };
            let values: Vec<serde_json::Value> =
                members.iter().filter_map(|m| m.field_value(field)).map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)).collect();
            serde_json::Value::Array(values)
        }
    }
}

impl Reduce {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, group_by: Vec<FieldPath>, aggregates: Vec<AggregateExpr>) -> Self {
        Self { group_by, aggregates, groups: BTreeMap::new(), schema: schema.into(), table: table.into() }
    }

    /// Materializes the group's current members into an immutable `Vec`
    /// before calling the combiner, so repeated calls (or repeated
    /// iteration by a caller holding the same pull) observe identical data
    /// (§4.E, §8 property 5).
    fn combine(&self, key: &str, group: &Group) -> Option<Node> {
        if group.members.is_empty() {
            return None;
        }
        let members: Vec<&Node> = group.members.values().collect();
        let mut row = Row::new(self.schema.clone(), self.table.clone(), Watermark::zero());
        row.primary_key.insert("group_key".into(), serde_json::json!(key));
        for agg in &self.aggregates {
            row.columns.insert(agg.alias.clone(), apply_aggregate(agg.func, agg.field.as_ref(), &members));
        }
        // expose the first member's group-by columns on the aggregate row
        if let Some(first) = members.first() {
            for field in &self.group_by {
                if let Some(v) = first.field_value(field) {
                    row.columns.insert(field.name.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null));
                }
            }
        }
        Some(Node::new(row))
    }

    /// Apply an upstream delta, returning the delta of group-aggregate rows
    /// that changed (retracting groups that became empty, §4.E).
    pub fn push(&mut self, delta: Delta) -> Delta {
        let mut touched: Vec<String> = Vec::new();
        let mut before: BTreeMap<String, Option<Node>> = BTreeMap::new();

        for entry in &delta {
            let key = group_key(&entry.node, &self.group_by);
            if !before.contains_key(&key) {
                let prior = self.groups.get(&key).and_then(|g| self.combine(&key, g));
                before.insert(key.clone(), prior);
                touched.push(key.clone());
            }
        }

        for entry in delta {
            let key = group_key(&entry.node, &self.group_by);
            let group = self.groups.entry(key).or_default();
            let identity = entry.node.value_identity();
            if entry.multiplicity > 0 {
                group.members.insert(identity, entry.node);
            } else {
                group.members.remove(&identity);
            }
        }

        let mut out = Vec::new();
        for key in touched {
            let prior = before.remove(&key).flatten();
            let after = self.groups.get(&key).and_then(|g| self.combine(&key, g));
            match (prior, after) {
                (Some(p), Some(a)) => {
                    out.push(DeltaEntry::remove(p));
                    out.push(DeltaEntry::add(a));
                }
                (Some(p), None) => out.push(DeltaEntry::remove(p)),
                (None, Some(a)) => out.push(DeltaEntry::add(a)),
                (None, None) => {}
            }
            if self.groups.get(&key).map(|g| g.members.is_empty()).unwrap_or(false) {
                self.groups.remove(&key);
            }
        }
        collapse(out)
    }

    pub fn hydrate(&self) -> Delta {
        self.groups.iter().filter_map(|(k, g)| self.combine(k, g)).map(DeltaEntry::add).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::Watermark as Wm;

    fn issue(id: i64, owner_id: i64, estimate: i64) -> Node {
        let mut r = Row::new("public", "issues", Wm::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("owner_id".into(), serde_json::json!(owner_id));
        r.columns.insert("estimate".into(), serde_json::json!(estimate));
        Node::new(r)
    }

    fn count_by_owner() -> Reduce {
        Reduce::new(
            "public",
            "issues_by_owner",
            vec!["owner_id".into()],
            vec![AggregateExpr { func: AggregateFunc::Count, field: None, alias: "count".into() }],
        )
    }

    #[test]
    fn group_emits_single_row_and_retracts_when_empty() {
        let mut reduce = count_by_owner();
        let added = reduce.push(vec![DeltaEntry::add(issue(1, 42, 3)), DeltaEntry::add(issue(2, 42, 5))]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].node.row.columns["count"], serde_json::json!(2));

        let removed = reduce.push(vec![DeltaEntry::remove(issue(1, 42, 3)), DeltaEntry::remove(issue(2, 42, 5))]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].multiplicity, -1);
    }

    #[test]
    fn re_pulling_same_group_yields_identical_data() {
        let mut reduce = count_by_owner();
        reduce.push(vec![DeltaEntry::add(issue(1, 42, 3))]);
        let first = reduce.hydrate();
        let second = reduce.hydrate();
        assert_eq!(first, second);
    }

    #[test]
    fn sum_and_avg_aggregates() {
        let mut reduce = Reduce::new(
            "public",
            "issues_by_owner",
            vec!["owner_id".into()],
            vec![
                AggregateExpr { func: AggregateFunc::Sum, field: Some("estimate".into()), alias: "total".into() },
                AggregateExpr { func: AggregateFunc::Avg, field: Some("estimate".into()), alias: "avg".into() },
            ],
        );
        let delta = reduce.push(vec![DeltaEntry::add(issue(1, 42, 4)), DeltaEntry::add(issue(2, 42, 6))]);
        assert_eq!(delta[0].node.row.columns["total"], serde_json::json!(10.0));
        assert_eq!(delta[0].node.row.columns["avg"], serde_json::json!(5.0));
    }
}
