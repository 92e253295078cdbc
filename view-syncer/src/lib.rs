//! The View Syncer (§4.H): the per-client-group service that owns the
//! CVR, subscribes one or more compiled query pipelines to the Change
//! Streamer, diffs old vs. new results at each upstream commit, and
//! produces ordered `pokeStart`/`pokePart`/`pokeEnd` sequences for the
//! Connection layer to stream out.

pub mod error;
mod syncer;
mod translate;

pub use error::SyncError;
pub use syncer::{spawn, SyncContext, ViewSyncerHandle};
