//! Durable storage backends for the Change Log Store (§4.B) and CVR
//! storage (§4.G, §6) built on `sled`: a single embedded `sled::Db`,
//! one tree per durable concern, values bincode-encoded.

mod changelog;
mod cvr;
mod error;
mod replica;

pub use changelog::SledChangeLogStore;
pub use cvr::SledCvrStore;
pub use error::SledError;
pub use replica::{seed_schemas, SledReplicaStore};

use std::path::Path;

use sled::Db;

/// Opens (or creates) the sled database backing both stores at `path`.
pub fn open(path: impl AsRef<Path>) -> Result<Db, SledError> {
    std::fs::create_dir_all(&path).map_err(|e| SledError::Io(e.to_string()))?;
    Ok(sled::open(path)?)
}

/// An ephemeral, temporary-directory database for tests and local demo
/// runs, mirroring `SledStorageEngine::new_test`.
pub fn open_temporary() -> Result<Db, SledError> {
    Ok(sled::Config::new().temporary(true).flush_every_ms(None).open()?)
}
