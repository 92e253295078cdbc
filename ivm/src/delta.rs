//! The multiset delta vocabulary every operator consumes and produces
//! (§3 "Multiset delta", §4.E). A `Node` is a row annotated with whatever
//! child rows a `Join` has attached under a relationship name; a `Delta` is
//! a sequence of `(Node, multiplicity)` pairs with multiplicity in `ℤ\{0}`.

use std::collections::BTreeMap;

use serde::Serialize;
use sync_proto::{Row, RowKey};
use sync_ql::selection::filter::Filterable;
use sync_ql::{FieldPath, Value};

/// A materialized row, optionally carrying joined child rows under a
/// relationship alias (`relationships[name]`, §4.E `Join`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub row: Row,
    pub relationships: BTreeMap<String, Vec<Node>>,
}

impl Node {
    pub fn new(row: Row) -> Self { Self { row, relationships: BTreeMap::new() } }

    pub fn key(&self) -> RowKey { self.row.key() }

    /// The identity a `Reduce`/`TreeView` replace-detection keys on: the
    /// row's primary key, independent of column contents (§4.E `Reduce`,
    /// `TreeView`).
    pub fn value_identity(&self) -> String { self.key().hash_hex() }

    /// Full-value identity (key + column contents + relationships) used by
    /// `collapse` to tell a true no-op (identical row added then removed)
    /// apart from an edit (same key, different content, which must survive
    /// as a replace pair rather than cancel to nothing).
    fn content_key(&self) -> String { serde_json::to_string(self).expect("Node always serializes") }

    pub fn with_relationship(mut self, name: impl Into<String>, children: Vec<Node>) -> Self {
        self.relationships.insert(name.into(), children);
        self
    }
}

impl Filterable for Node {
    fn field_value(&self, field: &FieldPath) -> Option<Value> {
        let value = match &field.qualifier {
            None => self.row.columns.get(&field.name).or_else(|| self.row.primary_key.get(&field.name))?,
            Some(qualifier) => {
                let children = self.relationships.get(qualifier)?;
                // A filter referencing a joined alias tests the first related
                // child; empty relationships (a `left` join miss) never match.
                let child = children.first()?;
                return child.field_value(&FieldPath::simple(field.name.clone()));
            }
        };
        Some(json_to_value(value))
    }
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(_) => Value::Null,
    }
}

/// A single `(row, multiplicity)` entry (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    pub node: Node,
    pub multiplicity: i64,
}

impl DeltaEntry {
    pub fn add(node: Node) -> Self { Self { node, multiplicity: 1 } }
    pub fn remove(node: Node) -> Self { Self { node, multiplicity: -1 } }
}

/// A multiset delta: the unit every operator edge carries (§3, §4.E).
pub type Delta = Vec<DeltaEntry>;

/// Collapses entries within a single commit to their net effect, per the
/// commutativity contract (§4.E): repeated touches of the same
/// `valueIdentity` must not surface as spurious intermediate emissions past
/// the commit boundary. Nets by exact value (key + content): an add and a
/// remove of *byte-identical* rows cancel (the idempotence invariant,
/// §4.E); an add and a remove that share a `valueIdentity` but differ in
/// content are a genuine edit and are kept as a replace pair — it is the
/// consumer's (`TreeView`/`Reduce`) job to recognize adjacent
/// remove-then-add of the same identity as an update rather than two
/// independent operations.
pub fn collapse(delta: Delta) -> Delta {
    let mut net: BTreeMap<String, (Node, i64)> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for entry in delta {
        let id = entry.node.content_key();
        match net.get_mut(&id) {
            Some((_, mult)) => *mult += entry.multiplicity,
            None => {
                order.push(id.clone());
                net.insert(id, (entry.node, entry.multiplicity));
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| {
            let (node, mult) = net.remove(&id)?;
            if mult == 0 {
                None
            } else {
                Some(DeltaEntry { node, multiplicity: mult })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::Watermark;

    fn row(id: i64) -> Row {
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r
    }

    #[test]
    fn collapse_nets_add_then_remove_to_nothing() {
        let n = Node::new(row(1));
        let delta = vec![DeltaEntry::add(n.clone()), DeltaEntry::remove(n)];
        assert!(collapse(delta).is_empty());
    }

    #[test]
    fn collapse_is_idempotent_on_a_stable_multiset() {
        let n = Node::new(row(1));
        let delta = vec![DeltaEntry::add(n.clone())];
        let once = collapse(delta.clone());
        let twice = collapse(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn field_value_resolves_joined_alias_from_first_child() {
        let mut parent = Node::new(row(1));
        let child = Node::new({
            let mut r = row(2);
            r.columns.insert("name".into(), serde_json::json!("alice"));
            r
        });
        parent.relationships.insert("owner".into(), vec![child]);
        let value = parent.field_value(&FieldPath::qualified("owner", "name"));
        assert_eq!(value, Some(Value::String("alice".into())));
    }
}
