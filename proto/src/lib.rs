//! Wire types and the change-log data model shared by every crate in this
//! workspace: the `Watermark`/`Row`/`Change` vocabulary of §3, the opaque
//! ids of §4.H/§6, and the client/server wire protocol of §6.

pub mod change;
pub mod changelog;
pub mod error;
pub mod ids;
pub mod row;
pub mod schema;
pub mod upstream;
pub mod watermark;

pub use change::Change;
pub use changelog::ChangeLogEntry;
pub use error::DecodeError;
pub use ids::{ClientGroupId, ClientId, PokeId, QueryHash, WsId, LMIDS_QUERY_HASH};
pub use row::{ColumnValue, Row, RowKey};
pub use schema::{ColumnSchema, IndexSchema, SortDirection, TableSchema};
pub use upstream::{
    Connected, DesiredQueriesPatchOp, Downstream, EntitiesPatchOp, ErrorBody, ErrorKind, Mutation, MutationPush, PatchOp, PokeEndBody,
    PokePartBody, PokeStartBody, Upstream,
};
pub use watermark::Watermark;
