//! `Filter(pred)` operator (§4.E): pure, stateless — passes deltas whose
//! row satisfies `pred` unchanged, drops the rest.

use sync_ql::selection::filter::evaluate_condition;
use sync_ql::Condition;

use crate::delta::Delta;
use crate::error::EvalError;

pub fn apply(condition: &Condition, delta: Delta) -> Result<Delta, EvalError> {
    let mut out = Vec::with_capacity(delta.len());
    for entry in delta {
        if evaluate_condition(&entry.node, condition)? {
            out.push(entry);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaEntry, Node};
    use sync_ql::{CompareOp, Value};
    use sync_proto::{Row, Watermark};

    fn node(id: i64, status: &str) -> Node {
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(id));
        r.columns.insert("status".into(), serde_json::json!(status));
        Node::new(r)
    }

    #[test]
    fn passes_only_matching_rows() {
        let cond = Condition::Simple { field: "status".into(), op: CompareOp::Eq, value: Value::String("open".into()) };
        let delta = vec![DeltaEntry::add(node(1, "open")), DeltaEntry::add(node(2, "closed"))];
        let filtered = apply(&cond, delta).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].node.row.primary_key["id"], serde_json::json!(1));
    }
}
