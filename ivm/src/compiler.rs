//! Query Compiler (§4.F): walks a `Select` AST and builds the operator
//! graph rooted at named `Source`s. One `Pipeline` per desired query; the
//! View Syncer feeds it each commit's per-table row changes and pulls the
//! current `TreeView` contents back out (§4.H).

use std::collections::BTreeMap;

use sync_proto::TableSchema;
use sync_ql::{AggregateFunc, Condition, FieldPath, Select};

use crate::delta::Delta;
use crate::distinct::{concat, Distinct};
use crate::error::{CompileError, EvalError, PipelineError};
use crate::join::Join;
use crate::reduce::Reduce;
use crate::source::{RowChange, Source};
use crate::treeview::TreeView;

/// Table schemas known to the compiler, used for compile-time column
/// existence checks (§4.F "unknown column in a condition -> rejected at
/// compile time").
pub struct Catalog<'a> {
    pub tables: &'a BTreeMap<String, TableSchema>,
}

impl<'a> Catalog<'a> {
    fn columns_of(&self, table: &str) -> Result<&TableSchema, CompileError> {
        self.tables.get(table).ok_or_else(|| CompileError::UnknownTable(table.to_string()))
    }

    fn check_column(&self, table: &str, field: &FieldPath) -> Result<(), CompileError> {
        let schema = self.columns_of(table)?;
        let known = schema.columns.contains_key(&field.name) || schema.primary_key.contains(&field.name);
        if known {
            Ok(())
        } else {
            Err(CompileError::UnknownColumn(field.clone()))
        }
    }

    fn check_condition(&self, table: &str, condition: &Condition) -> Result<(), CompileError> {
        let mut fields = Vec::new();
        condition.referenced_fields(&mut fields);
        for field in fields {
            // Qualified fields (joined aliases) are checked against the
            // child table by the join-compilation step, not here.
            if field.qualifier.is_none() {
                self.check_column(table, &field)?;
            }
        }
        Ok(())
    }
}

/// One node of the compiled operator tree (§4.E operator set, excluding
/// the root `TreeView`/`Reduce` which `Pipeline` owns directly).
enum QueryNode {
    Leaf { table: String, source: Source, filter: Option<Condition> },
    Join { join: Join, parent: Box<QueryNode>, child: Box<QueryNode> },
    Or { branches: Vec<QueryNode>, distinct: Distinct },
}

impl QueryNode {
    fn evaluate(&mut self, changes: &BTreeMap<String, Vec<RowChange>>) -> Result<Delta, PipelineError> {
        Ok(match self {
            QueryNode::Leaf { table, source, filter } => {
                let raw = match changes.get(table) {
                    Some(rcs) if !rcs.is_empty() => source.push(rcs.clone()),
                    _ => Vec::new(),
                };
                match filter {
                    Some(cond) => crate::filter::apply(cond, raw).map_err(EvalError::from)?,
                    None => raw,
                }
            }
            QueryNode::Join { join, parent, child } => {
                let parent_delta = parent.evaluate(changes)?;
                let child_delta = child.evaluate(changes)?;
                let from_parent = join.push_parent(parent_delta);
                let from_child = join.push_child(child_delta);
                concat(vec![from_parent, from_child])
            }
            QueryNode::Or { branches, distinct } => {
                let mut all = Vec::new();
                for branch in branches.iter_mut() {
                    all.push(branch.evaluate(changes)?);
                }
                distinct.push(concat(all))
            }
        })
    }

    fn hydrate(&self) -> Delta {
        match self {
            QueryNode::Leaf { source, filter, .. } => {
                let raw = source.hydrate();
                match filter {
                    Some(cond) => raw.into_iter().filter(|e| sync_ql::selection::filter::evaluate_condition(&e.node, cond).unwrap_or(false)).collect(),
                    None => raw,
                }
            }
            QueryNode::Join { join, .. } => join.hydrate(),
            QueryNode::Or { branches, distinct: _ } => concat(branches.iter().map(|b| b.hydrate()).collect()),
        }
    }
}

/// A compiled, runnable query pipeline (§4.F).
pub struct Pipeline {
    root: QueryNode,
    reduce: Option<Reduce>,
    having: Option<Condition>,
    /// `distinct(col)` (§3, §4.F step 6): a distinct-on stage keyed on the
    /// clause's column, or on the whole row when no column is named.
    distinct: Option<Distinct>,
    tree: TreeView,
    singular: bool,
}

impl Pipeline {
    /// Feed one commit's changes (grouped by table name) through the whole
    /// graph and update the root `TreeView` (§4.H step 3a-3b).
    pub fn apply_commit(&mut self, changes: &BTreeMap<String, Vec<RowChange>>) -> Result<(), PipelineError> {
        let mut delta = self.root.evaluate(changes)?;
        if let Some(reduce) = &mut self.reduce {
            delta = reduce.push(delta);
        }
        if let Some(having) = &self.having {
            delta = crate::filter::apply(having, delta).map_err(EvalError::from)?;
        }
        if let Some(distinct) = &mut self.distinct {
            delta = distinct.push(delta);
        }
        self.tree.push(delta);
        Ok(())
    }

    /// Full hydrate for subscription time (§4.E hydrate mode).
    pub fn hydrate(&mut self) -> Result<(), PipelineError> {
        let mut delta = self.root.hydrate();
        if let Some(reduce) = &mut self.reduce {
            delta = reduce.push(delta);
        }
        if let Some(having) = &self.having {
            delta = crate::filter::apply(having, delta).map_err(EvalError::from)?;
        }
        if let Some(distinct) = &mut self.distinct {
            delta = distinct.push(delta);
        }
        self.tree.push(delta);
        Ok(())
    }

    /// Current materialized result, in declared order. `one()` queries
    /// return at most one row (§3 `one()`, §8 "limit = 1 with one() yields
    /// singular").
    pub fn rows(&self) -> &[crate::delta::Node] {
        let rows = self.tree.rows();
        if self.singular {
            &rows[..rows.len().min(1)]
        } else {
            rows
        }
    }
}

fn compile_node(select: &Select, catalog: &Catalog) -> Result<QueryNode, CompileError> {
    catalog.columns_of(&select.table)?;

    let base_filter = select.where_clause.clone();
    if let Some(cond) = &base_filter {
        // OR at the top level branches the stream (§4.F step 3); AND
        // composes as a single stacked filter, so only validate columns
        // here for the common (non-OR-root) case — OR branches validate
        // their own sub-conditions below.
        if !matches!(cond, Condition::Or(_)) {
            catalog.check_condition(&select.table, cond)?;
        }
    }

    let mut node = match base_filter {
        Some(Condition::Or(branches)) => {
            let mut compiled_branches = Vec::with_capacity(branches.len());
            for branch in &branches {
                catalog.check_condition(&select.table, branch)?;
                compiled_branches.push(QueryNode::Leaf {
                    table: select.table.clone(),
                    source: Source::new(),
                    filter: Some(branch.clone()),
                });
            }
            QueryNode::Or { branches: compiled_branches, distinct: Distinct::new(None) }
        }
        other => QueryNode::Leaf { table: select.table.clone(), source: Source::new(), filter: other },
    };

    for join in &select.joins {
        catalog.columns_of(&join.other.table)?;
        catalog.check_column(&select.table, &join.parent_key)?;
        catalog.check_column(&join.other.table, &join.child_key)?;
        let child = compile_node(&join.other, catalog)?;
        let ivm_join = Join::new(join.kind, join.parent_key.clone(), join.child_key.clone(), join.r#as.clone());
        node = QueryNode::Join { join: ivm_join, parent: Box::new(node), child: Box::new(child) };
    }

    Ok(node)
}

/// Compile a `Select` AST into a runnable `Pipeline` (§4.F). Errors are
/// synchronous and leave no partial state (§4.F "Errors").
pub fn compile(select: &Select, catalog: &Catalog) -> Result<Pipeline, CompileError> {
    if let Some(limit) = select.limit {
        if limit < 0 {
            return Err(CompileError::InvalidLimit(limit));
        }
    }
    if !select.group_by.is_empty() {
        // grouped: fine, any aggregate function is valid
    } else if select.has_aggregates() {
        for agg in &select.aggregates {
            if matches!(agg.func, AggregateFunc::Min | AggregateFunc::Max | AggregateFunc::Array) {
                return Err(CompileError::AggregateRequiresGroupBy(agg.func));
            }
        }
    }

    let root = compile_node(select, catalog)?;

    let reduce = if !select.group_by.is_empty() || select.has_aggregates() {
        Some(Reduce::new(catalog.columns_of(&select.table)?.name.clone(), format!("{}_grouped", select.table), select.group_by.clone(), select.aggregates.clone()))
    } else {
        None
    };

    let order_by = if select.order_by.is_empty() {
        crate::treeview::ascending(catalog.columns_of(&select.table)?.primary_key.iter().map(|c| FieldPath::simple(c.clone())))
    } else {
        select.order_by.clone()
    };
    let limit = select.limit.map(|l| l as usize);

    let distinct = select.distinct.as_ref().map(|d| Distinct::new(d.on.clone()));

    Ok(Pipeline { root, reduce, having: select.having.clone(), distinct, tree: TreeView::new(order_by, limit), singular: select.one })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::{ColumnSchema, Watermark};

    fn schema(name: &str, columns: &[&str], pk: &[&str]) -> TableSchema {
        let mut cols = BTreeMap::new();
        for (i, c) in columns.iter().enumerate() {
            cols.insert(c.to_string(), ColumnSchema { name: c.to_string(), r#type: "text".into(), nullable: true, default: None, pos: i as u32 });
        }
        TableSchema { name: name.to_string(), columns: cols, primary_key: pk.iter().map(|s| s.to_string()).collect(), indexes: vec![] }
    }

    fn row(id: i64, title: &str) -> RowChange {
        let mut r = sync_proto::Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("title".into(), serde_json::json!(title));
        RowChange::Add(r)
    }

    #[test]
    fn rejects_negative_limit() {
        let mut tables = BTreeMap::new();
        tables.insert("issues".to_string(), schema("issues", &["id", "title"], &["id"]));
        let catalog = Catalog { tables: &tables };
        let mut select = Select::new("issues");
        select.columns = vec!["id".into(), "title".into()];
        select.limit = Some(-1);
        assert_eq!(compile(&select, &catalog), Err(CompileError::InvalidLimit(-1)));
    }

    #[test]
    fn rejects_unknown_column_in_where() {
        let mut tables = BTreeMap::new();
        tables.insert("issues".to_string(), schema("issues", &["id", "title"], &["id"]));
        let catalog = Catalog { tables: &tables };
        let mut select = Select::new("issues");
        select.columns = vec!["id".into()];
        select.where_clause =
            Some(Condition::Simple { field: "nope".into(), op: sync_ql::CompareOp::Eq, value: sync_ql::Value::Null });
        assert!(matches!(compile(&select, &catalog), Err(CompileError::UnknownColumn(_))));
    }

    #[test]
    fn simple_select_materializes_in_primary_key_order() {
        let mut tables = BTreeMap::new();
        tables.insert("issues".to_string(), schema("issues", &["id", "title"], &["id"]));
        let catalog = Catalog { tables: &tables };
        let mut select = Select::new("issues");
        select.columns = vec!["id".into(), "title".into()];
        let mut pipeline = compile(&select, &catalog).unwrap();

        let mut changes = BTreeMap::new();
        changes.insert("issues".to_string(), vec![row(2, "b"), row(1, "a")]);
        pipeline.apply_commit(&changes).unwrap();

        let ids: Vec<_> = pipeline.rows().iter().map(|n| n.row.primary_key["id"].clone()).collect();
        assert_eq!(ids, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn limit_zero_yields_empty_result() {
        let mut tables = BTreeMap::new();
        tables.insert("issues".to_string(), schema("issues", &["id", "title"], &["id"]));
        let catalog = Catalog { tables: &tables };
        let mut select = Select::new("issues");
        select.columns = vec!["id".into()];
        select.limit = Some(0);
        let mut pipeline = compile(&select, &catalog).unwrap();
        let mut changes = BTreeMap::new();
        changes.insert("issues".to_string(), vec![row(1, "a")]);
        pipeline.apply_commit(&changes).unwrap();
        assert!(pipeline.rows().is_empty());
    }

    #[test]
    fn distinct_on_column_keeps_only_the_first_row_per_key() {
        let mut tables = BTreeMap::new();
        tables.insert("issues".to_string(), schema("issues", &["id", "title"], &["id"]));
        let catalog = Catalog { tables: &tables };
        let mut select = Select::new("issues");
        select.columns = vec!["id".into(), "title".into()];
        select.distinct = Some(sync_ql::DistinctClause { on: Some("title".into()) });
        let mut pipeline = compile(&select, &catalog).unwrap();

        let mut changes = BTreeMap::new();
        changes.insert("issues".to_string(), vec![row(1, "a"), row(2, "a"), row(3, "b")]);
        pipeline.apply_commit(&changes).unwrap();

        let ids: Vec<_> = pipeline.rows().iter().map(|n| n.row.primary_key["id"].clone()).collect();
        assert_eq!(ids, vec![serde_json::json!(1), serde_json::json!(3)]);
    }

    #[test]
    fn one_restricts_to_singular_row() {
        let mut tables = BTreeMap::new();
        tables.insert("issues".to_string(), schema("issues", &["id", "title"], &["id"]));
        let catalog = Catalog { tables: &tables };
        let mut select = Select::new("issues");
        select.columns = vec!["id".into()];
        select.one = true;
        let mut pipeline = compile(&select, &catalog).unwrap();
        let mut changes = BTreeMap::new();
        changes.insert("issues".to_string(), vec![row(1, "a"), row(2, "b")]);
        pipeline.apply_commit(&changes).unwrap();
        assert_eq!(pipeline.rows().len(), 1);
    }
}
