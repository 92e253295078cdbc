use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{name, columns: ordered map name -> {type, nullable, default, pos}, primaryKey, indexes}`
/// (§3 "TableSchema"). Column order is significant — `pos` is the
/// authoritative ordering even though the map itself is keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: BTreeMap<String, ColumnSchema>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    /// Column names in their declared `pos` order — the order that defines
    /// a `Source` operator's natural row order when no explicit `orderBy`
    /// is given (§3).
    pub fn ordered_column_names(&self) -> Vec<&str> {
        let mut cols: Vec<&ColumnSchema> = self.columns.values().collect();
        cols.sort_by_key(|c| c.pos);
        cols.into_iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub r#type: String,
    pub nullable: bool,
    pub default: Option<serde_json::Value>,
    pub pos: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub unique: bool,
    /// Ordered map column name -> sort direction.
    pub columns: Vec<(String, SortDirection)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}
