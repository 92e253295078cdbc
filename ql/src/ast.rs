//! Query AST: the declarative shape a client's desired query takes on the
//! wire and the shape the query compiler (`sync_ivm::compiler`) walks to
//! build an operator graph. This AST is not produced by parsing source
//! text in the hot path — clients ship it pre-built as JSON in
//! `desiredQueriesPatch` (§6) — so there is no grammar here, only the
//! tree and the value/condition machinery every operator needs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A possibly-qualified column reference, e.g. `title` or `owner.name` when
/// `owner` is a join alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    pub qualifier: Option<String>,
    pub name: String,
}

impl FieldPath {
    pub fn simple(name: impl Into<String>) -> Self { Self { qualifier: None, name: name.into() } }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self { qualifier: Some(qualifier.into()), name: name.into() }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((q, n)) => FieldPath::qualified(q, n),
            None => FieldPath::simple(s),
        }
    }
}

/// Runtime value domain for query evaluation. Rows carry typed column
/// values that get coerced into this domain by the caller (storage layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Numeric comparison key; `None` for non-numeric values so the caller
    /// can reject (rather than silently coerce) cross-type comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Intersects,
    Disjoint,
    Superset,
    Subset,
    Congruent,
    Incongruent,
}

/// A condition tree: `AND`/`OR` of simple comparisons, generalized to the
/// wider comparison operator set `where`/`having` clauses need (§3),
/// including the set-relation operators (INTERSECTS, SUPERSET, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Simple { field: FieldPath, op: CompareOp, value: Value },
}

impl Condition {
    pub fn and(conds: impl IntoIterator<Item = Condition>) -> Condition { Condition::And(conds.into_iter().collect()) }
    pub fn or(conds: impl IntoIterator<Item = Condition>) -> Condition { Condition::Or(conds.into_iter().collect()) }

    /// Every field referenced anywhere in the tree, for compile-time column
    /// existence checks (§4.F).
    pub fn referenced_fields(&self, out: &mut Vec<FieldPath>) {
        match self {
            Condition::And(cs) | Condition::Or(cs) => cs.iter().for_each(|c| c.referenced_fields(out)),
            Condition::Simple { field, .. } => out.push(field.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub parent_key: FieldPath,
    pub child_key: FieldPath,
    pub other: Box<Select>,
    /// Alias the joined child rows are exposed under (`relationships[as]`, §4.E).
    pub r#as: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub func: AggregateFunc,
    pub field: Option<FieldPath>,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub field: FieldPath,
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctClause {
    /// `DISTINCT ON (col)`; `None` means plain `distinct()` over the whole row.
    pub on: Option<FieldPath>,
}

/// The full declarative query tree a client (or an internal query) desires.
/// Rooted at `table`; `joins` recurse via nested `Select`s (§3, §4.F).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub table: String,
    pub alias: Option<String>,
    /// Empty is only valid for nested join `Select`s — the root query
    /// always carries an explicit column list, since CVR column coverage
    /// tracking (§3) needs to know exactly which columns are desired.
    pub columns: Vec<FieldPath>,
    pub where_clause: Option<Condition>,
    pub joins: Vec<Join>,
    pub group_by: Vec<FieldPath>,
    pub aggregates: Vec<AggregateExpr>,
    pub having: Option<Condition>,
    pub distinct: Option<DistinctClause>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<i64>,
    pub one: bool,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            where_clause: None,
            joins: Vec::new(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            having: None,
            distinct: None,
            order_by: Vec::new(),
            limit: None,
            one: false,
        }
    }

    pub fn has_aggregates(&self) -> bool { !self.aggregates.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_from_str_splits_qualifier() {
        let f: FieldPath = "owner.name".into();
        assert_eq!(f.qualifier.as_deref(), Some("owner"));
        assert_eq!(f.name, "name");

        let g: FieldPath = "title".into();
        assert_eq!(g.qualifier, None);
        assert_eq!(g.name, "title");
    }

    #[test]
    fn condition_collects_referenced_fields() {
        let cond = Condition::and([
            Condition::Simple { field: "status".into(), op: CompareOp::Eq, value: Value::String("open".into()) },
            Condition::or([
                Condition::Simple { field: "owner.name".into(), op: CompareOp::Eq, value: Value::String("alice".into()) },
                Condition::Simple { field: "priority".into(), op: CompareOp::Gte, value: Value::I64(3) },
            ]),
        ]);
        let mut fields = Vec::new();
        cond.referenced_fields(&mut fields);
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1], FieldPath::qualified("owner", "name"));
    }

    #[test]
    fn value_ordering_compares_numeric_across_int_and_float() {
        let a = Value::I64(3);
        let b = Value::F64(3.5);
        assert!(a.partial_cmp(&b) == Some(std::cmp::Ordering::Less));
    }
}
