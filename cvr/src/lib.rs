//! The Client View Record (§4.G): the contract between the View Syncer
//! and a client group about what rows it currently sees, at what
//! version.

pub mod error;
pub mod model;
pub mod store;

pub use error::CvrError;
pub use model::{Cvr, QueryRecord, QueryResult, RowPatch, RowPatchOp, RowRecord, Version};
pub use store::{CvrStore, InMemoryCvrStore};
