//! `Catch` (§4.E): a test-only sink that records every delta it receives,
//! for asserting on operator output shape in unit tests.

use crate::delta::Delta;

#[derive(Default)]
pub struct Catch {
    pub history: Vec<Delta>,
}

impl Catch {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, delta: Delta) { self.history.push(delta) }

    pub fn last(&self) -> Option<&Delta> { self.history.last() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaEntry, Node};
    use sync_proto::{Row, Watermark};

    #[test]
    fn records_every_delta_in_order() {
        let mut catch = Catch::new();
        let mut r = Row::new("public", "issues", Watermark::new("w1"));
        r.primary_key.insert("id".into(), serde_json::json!(1));
        catch.push(vec![DeltaEntry::add(Node::new(r))]);
        assert_eq!(catch.history.len(), 1);
        assert_eq!(catch.last().unwrap().len(), 1);
    }
}
