use serde::{Deserialize, Serialize};

use crate::change::Change;
use crate::watermark::Watermark;

/// `(watermark, change)` in strict watermark order (§3 "ChangeLog entry").
/// `(watermark, Change::Commit)` is the transaction boundary every
/// subscriber's catch-up splice point is computed against (§4.C).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub watermark: Watermark,
    pub change: Change,
}

impl ChangeLogEntry {
    pub fn new(watermark: Watermark, change: Change) -> Self { Self { watermark, change } }

    pub fn is_commit(&self) -> bool { matches!(self.change, Change::Commit) }
}
