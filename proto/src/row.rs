use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::watermark::Watermark;

/// A column value as carried over the wire or through the change log.
/// `serde_json::Value` gives every backend-independent representation we
/// need (strings, numbers, bools, null, nested JSON for `jsonb` columns)
/// without forcing a typed column-by-column schema at this layer.
pub type ColumnValue = serde_json::Value;

/// `{schema, table, primaryKey -> values, columns -> values, rowVersion}`
/// (§3 "Row"). `primary_key` and `columns` are disjoint: `columns` holds
/// every non-key column the row carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub schema: String,
    pub table: String,
    pub primary_key: BTreeMap<String, ColumnValue>,
    pub columns: BTreeMap<String, ColumnValue>,
    /// Mirrors the reserved `_0_version` column: the watermark of the
    /// transaction that last wrote this row.
    pub row_version: Watermark,
}

impl Row {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, row_version: Watermark) -> Self {
        Self { schema: schema.into(), table: table.into(), primary_key: BTreeMap::new(), columns: BTreeMap::new(), row_version }
    }

    /// A stable identity independent of column contents, used as the
    /// `valueIdentity` IVM operators key replaces on (§4.E).
    pub fn key(&self) -> RowKey {
        RowKey { schema: self.schema.clone(), table: self.table.clone(), primary_key: self.primary_key.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowKey {
    pub schema: String,
    pub table: String,
    pub primary_key: BTreeMap<String, ColumnValue>,
}

impl RowKey {
    /// `(schema, table, primary_key)` ordered lexicographically; the
    /// primary key's `serde_json::Value`s have no native `Ord`, so we
    /// order by their canonical JSON encoding instead. `BTreeMap`
    /// iteration order makes this deterministic regardless of
    /// insertion order, and it coincides with primary-key order within
    /// one table (§4.E "Source ... Ordered by a declared key").
    fn sort_key(&self) -> (&str, &str, String) {
        (&self.schema, &self.table, serde_json::to_string(&self.primary_key).unwrap_or_default())
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.sort_key().cmp(&other.sort_key()) }
}

impl RowKey {
    /// Stable hash used as the `{rowKeyHash}` path segment under
    /// `/vs/cvr/{group}/d/{rowKeyHash}` (§6). `BTreeMap` iterates in key
    /// order so this is deterministic regardless of construction order.
    pub fn hash_hex(&self) -> String {
        let canonical = serde_json::to_vec(self).expect("RowKey always serializes");
        let digest = Sha256::digest(&canonical);
        hex_encode(&digest)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}#{:?}", self.schema, self.table, self.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_order_independent() {
        let mut a = Row::new("public", "issues", Watermark::new("w1"));
        a.primary_key.insert("id".into(), serde_json::json!(1));
        let mut b = Row::new("public", "issues", Watermark::new("w2"));
        b.primary_key.insert("id".into(), serde_json::json!(1));
        assert_eq!(a.key().hash_hex(), b.key().hash_hex());
    }
}
