//! Evaluates a [`Condition`](crate::ast::Condition) tree against a single
//! row. Used both by the `Filter` operator (row-at-a-time, on every delta)
//! and by storage backends that want to supplement an index scan with a
//! full predicate check.

use crate::ast::{CompareOp, Condition, FieldPath, Value};
use crate::error::FilterError;
use crate::like::like_match;

/// A row a condition tree can be evaluated against. Implementors resolve a
/// (possibly join-qualified) field path to a typed [`Value`].
pub trait Filterable {
    fn field_value(&self, field: &FieldPath) -> Option<Value>;
}

pub fn evaluate_condition<R: Filterable>(row: &R, condition: &Condition) -> Result<bool, FilterError> {
    match condition {
        Condition::And(cs) => {
            for c in cs {
                if !evaluate_condition(row, c)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(cs) => {
            for c in cs {
                if evaluate_condition(row, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Simple { field, op, value } => {
            let actual = row.field_value(field).ok_or_else(|| FilterError::FieldNotFound(field.clone()))?;
            evaluate_comparison(&actual, *op, value)
        }
    }
}

fn evaluate_comparison(actual: &Value, op: CompareOp, expected: &Value) -> Result<bool, FilterError> {
    // Per the comparison-operator Open Question decision (DESIGN.md): a NULL
    // operand never matches any comparison operator, including `!=`.
    if matches!(op, CompareOp::Eq | CompareOp::NotEq | CompareOp::Lt | CompareOp::Gt | CompareOp::Lte | CompareOp::Gte)
        && (actual.is_null() || expected.is_null())
    {
        return Ok(false);
    }

    Ok(match op {
        CompareOp::Eq => actual == expected,
        CompareOp::NotEq => actual != expected,
        CompareOp::Lt => actual.partial_cmp(expected) == Some(std::cmp::Ordering::Less),
        CompareOp::Gt => actual.partial_cmp(expected) == Some(std::cmp::Ordering::Greater),
        CompareOp::Lte => matches!(actual.partial_cmp(expected), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        CompareOp::Gte => matches!(actual.partial_cmp(expected), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        CompareOp::In => expected.as_list().map(|items| items.contains(actual)).unwrap_or(false),
        CompareOp::NotIn => !expected.as_list().map(|items| items.contains(actual)).unwrap_or(false),
        CompareOp::Like | CompareOp::NotLike | CompareOp::ILike | CompareOp::NotILike => {
            let (actual_s, pattern_s) = match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(p)) => (a, p),
                _ => return Err(FilterError::TypeMismatch { op }),
            };
            let insensitive = matches!(op, CompareOp::ILike | CompareOp::NotILike);
            let matched = like_match(pattern_s, actual_s, insensitive)?;
            if matches!(op, CompareOp::NotLike | CompareOp::NotILike) {
                !matched
            } else {
                matched
            }
        }
        CompareOp::Intersects | CompareOp::Disjoint | CompareOp::Superset | CompareOp::Subset | CompareOp::Congruent | CompareOp::Incongruent => {
            let (a, b) = match (actual.as_list(), expected.as_list()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(FilterError::TypeMismatch { op }),
            };
            let any_shared = a.iter().any(|x| b.contains(x));
            let a_subset_of_b = a.iter().all(|x| b.contains(x));
            let b_subset_of_a = b.iter().all(|x| a.contains(x));
            match op {
                CompareOp::Intersects => any_shared,
                CompareOp::Disjoint => !any_shared,
                CompareOp::Superset => b_subset_of_a,
                CompareOp::Subset => a_subset_of_b,
                CompareOp::Congruent => a_subset_of_b && b_subset_of_a,
                CompareOp::Incongruent => !(a_subset_of_b && b_subset_of_a),
                _ => unreachable!(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FieldPath;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct TestRow(HashMap<&'static str, Value>);

    impl TestRow {
        fn new(fields: &[(&'static str, Value)]) -> Self { Self(fields.iter().cloned().collect()) }
    }

    impl Filterable for TestRow {
        fn field_value(&self, field: &FieldPath) -> Option<Value> { self.0.get(field.name.as_str()).cloned() }
    }

    fn cond(field: &str, op: CompareOp, value: Value) -> Condition {
        Condition::Simple { field: field.into(), op, value }
    }

    #[test]
    fn simple_equality() {
        let alice = TestRow::new(&[("name", Value::String("Alice".into())), ("age", Value::I64(30))]);
        let bob = TestRow::new(&[("name", Value::String("Bob".into())), ("age", Value::I64(25))]);

        let c = cond("name", CompareOp::Eq, Value::String("Alice".into()));
        assert!(evaluate_condition(&alice, &c).unwrap());
        assert!(!evaluate_condition(&bob, &c).unwrap());
    }

    #[test]
    fn and_condition() {
        let alice30 = TestRow::new(&[("name", Value::String("Alice".into())), ("age", Value::I64(30))]);
        let c = Condition::and([
            cond("name", CompareOp::Eq, Value::String("Alice".into())),
            cond("age", CompareOp::Eq, Value::I64(30)),
        ]);
        assert!(evaluate_condition(&alice30, &c).unwrap());
    }

    #[test]
    fn complex_or_and_range() {
        let rows = vec![
            TestRow::new(&[("name", Value::String("Alice".into())), ("age", Value::I64(20))]),
            TestRow::new(&[("name", Value::String("Charlie".into())), ("age", Value::I64(30))]),
            TestRow::new(&[("name", Value::String("Eve".into())), ("age", Value::I64(40))]),
        ];
        let c = Condition::and([
            Condition::or([
                cond("name", CompareOp::Eq, Value::String("Alice".into())),
                cond("name", CompareOp::Eq, Value::String("Charlie".into())),
            ]),
            cond("age", CompareOp::Gte, Value::I64(30)),
            cond("age", CompareOp::Lte, Value::I64(40)),
        ]);
        let results: Vec<_> = rows.iter().map(|r| evaluate_condition(r, &c).unwrap()).collect();
        assert_eq!(results, vec![false, true, false]);
    }

    #[test]
    fn in_operator() {
        let rows = vec![
            TestRow::new(&[("name", Value::String("Alice".into()))]),
            TestRow::new(&[("name", Value::String("Bob".into()))]),
        ];
        let c = cond(
            "name",
            CompareOp::In,
            Value::List(vec![Value::String("Alice".into()), Value::String("Eve".into())]),
        );
        let results: Vec<_> = rows.iter().map(|r| evaluate_condition(r, &c).unwrap()).collect();
        assert_eq!(results, vec![true, false]);
    }

    #[test]
    fn like_and_ilike() {
        let row = TestRow::new(&[("title", Value::String("Urgent Bug".into()))]);
        assert!(evaluate_condition(&row, &cond("title", CompareOp::Like, Value::String("Urgent%".into()))).unwrap());
        assert!(!evaluate_condition(&row, &cond("title", CompareOp::Like, Value::String("urgent%".into()))).unwrap());
        assert!(evaluate_condition(&row, &cond("title", CompareOp::ILike, Value::String("urgent%".into()))).unwrap());
    }

    #[test]
    fn set_operators() {
        let row = TestRow::new(&[("tags", Value::List(vec![Value::String("a".into()), Value::String("b".into())]))]);
        let subset = Value::List(vec![Value::String("a".into())]);
        let disjoint = Value::List(vec![Value::String("z".into())]);
        assert!(evaluate_condition(&row, &cond("tags", CompareOp::Superset, subset.clone())).unwrap());
        assert!(!evaluate_condition(&row, &cond("tags", CompareOp::Subset, subset)).unwrap());
        assert!(evaluate_condition(&row, &cond("tags", CompareOp::Disjoint, disjoint.clone())).unwrap());
        assert!(!evaluate_condition(&row, &cond("tags", CompareOp::Intersects, disjoint)).unwrap());
    }

    #[test]
    fn null_never_matches_equality() {
        let row = TestRow::new(&[("deleted_at", Value::Null)]);
        assert!(!evaluate_condition(&row, &cond("deleted_at", CompareOp::Eq, Value::Null)).unwrap());
        assert!(!evaluate_condition(&row, &cond("deleted_at", CompareOp::NotEq, Value::Null)).unwrap());
    }
}
