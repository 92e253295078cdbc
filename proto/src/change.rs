use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::schema::TableSchema;
use crate::watermark::Watermark;

/// A single logical-replication event, tagged per §3 "Change". `Begin`
/// opens a transaction and `Commit` closes it; every other variant between
/// them shares that transaction's identity and must not interleave with
/// another transaction's events (§4.A).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    Begin { commit_watermark: Watermark },
    Insert { schema: String, table: String, row: Row },
    Update { schema: String, table: String, key: Row, row: Row },
    Delete { schema: String, table: String, key: Row },
    Truncate { schema: String, table: String },
    Commit,
    Relation { schema: TableSchema },
    DropTable { schema: String, table: String },
    CreateTable { schema: TableSchema },
    AddColumn { schema: String, table: String, column: crate::schema::ColumnSchema },
    DropColumn { schema: String, table: String, column: String },
    UpdateColumn { schema: String, table: String, column: crate::schema::ColumnSchema },
    CreateIndex { schema: String, table: String, index: crate::schema::IndexSchema },
    DropIndex { schema: String, table: String, index: String },
}

impl Change {
    /// True for the variants that carry row data rather than transaction
    /// framing or DDL, i.e. what the IVM `Source` operator's `push` consumes.
    pub fn is_data_change(&self) -> bool { matches!(self, Change::Insert { .. } | Change::Update { .. } | Change::Delete { .. }) }

    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            Change::Relation { .. }
                | Change::DropTable { .. }
                | Change::CreateTable { .. }
                | Change::AddColumn { .. }
                | Change::DropColumn { .. }
                | Change::UpdateColumn { .. }
                | Change::CreateIndex { .. }
                | Change::DropIndex { .. }
        )
    }
}
