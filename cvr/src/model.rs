//! The Client View Record itself (§4.G): the contract between the View
//! Syncer and a client group about what rows the group currently sees,
//! at what version.

use std::collections::{BTreeMap, BTreeSet};

use sync_proto::{ClientGroupId, ClientId, PatchOp, QueryHash, Row, RowKey, Watermark};
use sync_ql::Select;

/// `version.stateVersion` / `version.minorVersion` (§3, §6 "/vs/cvr/{group}/meta").
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Version {
    pub state_version: Option<Watermark>,
    pub minor_version: u32,
}

/// One entry of `cvr.queries`: the AST a client group currently wants,
/// and which `ClientId`s in the group desire it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QueryRecord {
    pub hash: QueryHash,
    pub ast: Select,
    pub desired_by: BTreeSet<ClientId>,
}

/// One entry of `cvr.rows`, keyed by `RowKey` (`/vs/cvr/{group}/d/{rowKeyHash}`, §6).
/// `queried_columns` is the union, across every query that currently
/// covers this row, of the columns each query selects — this is what
/// `reconcileRows` diffs against.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct RowRecord {
    pub queried_columns: BTreeMap<QueryHash, BTreeSet<String>>,
    pub row_version: Watermark,
}

impl RowRecord {
    fn all_columns(&self) -> BTreeSet<String> { self.queried_columns.values().flatten().cloned().collect() }

    fn is_covered(&self) -> bool { !self.queried_columns.is_empty() }
}

/// One query's full current result set, as pulled from its pipeline's
/// `TreeView` (§4.H step 3b), annotated with the columns it selects —
/// the input to `reconcileRows`.
pub struct QueryResult {
    pub hash: QueryHash,
    pub columns: BTreeSet<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPatchOp {
    Put,
    Del,
}

/// One row-level patch (§4.G `reconcileRows`), persisted for catch-up
/// under `/vs/cvr/{group}/p/d/{version}/r/{opaqueID}` (§6) and translated
/// by the View Syncer into wire `EntitiesPatchOp`s.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPatch {
    pub row_key: RowKey,
    pub op: RowPatchOp,
    pub columns: BTreeSet<String>,
    pub row_version: Watermark,
}

/// A client view record for one client group (§4.G, §3 "CVR").
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Cvr {
    pub group: Option<ClientGroupId>,
    pub version: Version,
    /// `clients -> lastMutationID` (§3, §6 "/vs/cvr/{group}/meta"). The
    /// mutagen/business-logic side of mutation application is out of
    /// scope (§1); what the CVR and wire protocol need is just this
    /// counter, surfaced to clients via `pokePart.lastMutationIDChanges`.
    pub clients: BTreeMap<ClientId, u64>,
    pub queries: BTreeMap<QueryHash, QueryRecord>,
    pub rows: BTreeMap<RowKey, RowRecord>,
}

impl Cvr {
    pub fn new(group: ClientGroupId) -> Self { Self { group: Some(group), ..Default::default() } }

    /// Applies one `{op, hash, ast?}` entry of a `desiredQueriesPatch`
    /// (§4.G `putDesiredQueries`). `put` requires an `ast`; the caller
    /// validated compilation succeeds before calling this (§4.H
    /// "if AST compilation fails, rejects without mutating the CVR").
    pub fn put_desired_query(&mut self, client: ClientId, op: PatchOp, hash: QueryHash, ast: Option<Select>) {
        match op {
            PatchOp::Put => {
                let ast = ast.expect("caller validates ast is present for a put");
                self.queries
                    .entry(hash.clone())
                    .and_modify(|q| {
                        q.desired_by.insert(client.clone());
                    })
                    .or_insert_with(|| {
                        let mut desired_by = BTreeSet::new();
                        desired_by.insert(client.clone());
                        QueryRecord { hash, ast, desired_by }
                    });
                self.clients.entry(client).or_insert(0);
            }
            PatchOp::Del => {
                if let Some(record) = self.queries.get_mut(&hash) {
                    record.desired_by.remove(&client);
                    if record.desired_by.is_empty() {
                        self.queries.remove(&hash);
                    }
                }
            }
        }
    }

    /// Diffs `new_results` (one per currently-desired query) against
    /// `self.rows`, returning the row patches to send downstream and
    /// applying the updated coverage to `self.rows` in place (§4.G).
    /// Idempotent: calling again with identical `new_results` and no
    /// intervening mutation yields an empty patch list (§4.G invariant,
    /// §8 property 3).
    pub fn reconcile_rows(&mut self, new_results: &[QueryResult]) -> Vec<RowPatch> {
        let mut new_coverage: BTreeMap<RowKey, (BTreeMap<QueryHash, BTreeSet<String>>, Watermark)> = BTreeMap::new();
        for result in new_results {
            for row in &result.rows {
                let key = row.key();
                let entry = new_coverage.entry(key).or_insert_with(|| (BTreeMap::new(), row.row_version.clone()));
                entry.0.insert(result.hash.clone(), result.columns.clone());
                // the row's own version always wins; every query result for
                // the same row key reflects the same physical row.
                entry.1 = row.row_version.clone();
            }
        }

        let mut patches = Vec::new();

        // Rows now covered, newly or still: put if new, or if version/columns changed.
        for (key, (queried_columns, row_version)) in new_coverage.iter() {
            let columns: BTreeSet<String> = queried_columns.values().flatten().cloned().collect();
            match self.rows.get(key) {
                None => patches.push(RowPatch { row_key: key.clone(), op: RowPatchOp::Put, columns: columns.clone(), row_version: row_version.clone() }),
                Some(existing) if !existing.is_covered() => {
                    patches.push(RowPatch { row_key: key.clone(), op: RowPatchOp::Put, columns: columns.clone(), row_version: row_version.clone() })
                }
                Some(existing) if existing.row_version != *row_version || existing.all_columns() != columns => {
                    patches.push(RowPatch { row_key: key.clone(), op: RowPatchOp::Put, columns: columns.clone(), row_version: row_version.clone() })
                }
                _ => {}
            }
            self.rows.insert(key.clone(), RowRecord { queried_columns: queried_columns.clone(), row_version: row_version.clone() });
        }

        // Rows previously covered but absent from every current query result: retract.
        let vanished: Vec<RowKey> = self.rows.iter().filter(|(k, r)| r.is_covered() && !new_coverage.contains_key(*k)).map(|(k, _)| k.clone()).collect();
        for key in vanished {
            let existing = self.rows.remove(&key).expect("just observed present");
            patches.push(RowPatch { row_key: key, op: RowPatchOp::Del, columns: existing.all_columns(), row_version: existing.row_version });
        }

        patches
    }

    /// Records that `client`'s mutation `mutation_id` has been applied
    /// (§4.I `push`), advancing its `lastMutationID` if `mutation_id` is
    /// newer. Out-of-order or duplicate acks are harmless no-ops.
    pub fn record_mutation(&mut self, client: ClientId, mutation_id: u64) {
        let current = self.clients.entry(client).or_insert(0);
        if mutation_id > *current {
            *current = mutation_id;
        }
    }

    /// Sets `version.stateVersion` once a poke built from `reconcile_rows`'s
    /// output has been fully emitted (§4.G `advanceVersion`, §4.H step 3e).
    pub fn advance_version(&mut self, to_state_version: Watermark) {
        self.version.state_version = Some(to_state_version);
        self.version.minor_version = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, version: &str) -> Row {
        let mut r = Row::new("public", "issues", Watermark::new(version));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("title".into(), serde_json::json!("t"));
        r
    }

    fn result(hash: &str, rows: Vec<Row>) -> QueryResult {
        let mut columns = BTreeSet::new();
        columns.insert("id".to_string());
        columns.insert("title".to_string());
        QueryResult { hash: QueryHash::from(hash), columns, rows }
    }

    #[test]
    fn new_row_emits_a_put_patch() {
        let mut cvr = Cvr::new(ClientGroupId::from("g1"));
        let patches = cvr.reconcile_rows(&[result("q1", vec![row(1, "w1")])]);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].op, RowPatchOp::Put);
    }

    #[test]
    fn reconciling_twice_with_identical_input_is_a_no_op() {
        let mut cvr = Cvr::new(ClientGroupId::from("g1"));
        cvr.reconcile_rows(&[result("q1", vec![row(1, "w1")])]);
        let second = cvr.reconcile_rows(&[result("q1", vec![row(1, "w1")])]);
        assert!(second.is_empty());
    }

    #[test]
    fn row_leaving_every_query_emits_a_del_patch() {
        let mut cvr = Cvr::new(ClientGroupId::from("g1"));
        cvr.reconcile_rows(&[result("q1", vec![row(1, "w1")])]);
        let patches = cvr.reconcile_rows(&[result("q1", vec![])]);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].op, RowPatchOp::Del);
    }

    #[test]
    fn version_bump_with_unchanged_membership_emits_a_put_patch() {
        let mut cvr = Cvr::new(ClientGroupId::from("g1"));
        cvr.reconcile_rows(&[result("q1", vec![row(1, "w1")])]);
        let patches = cvr.reconcile_rows(&[result("q1", vec![row(1, "w2")])]);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].op, RowPatchOp::Put);
        assert_eq!(patches[0].row_version, Watermark::new("w2"));
    }
}
