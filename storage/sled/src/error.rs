use thiserror::Error;

/// Errors from the sled-backed stores; converted into each consumer
/// crate's own error type (`sync_streamer::LogStoreError`,
/// `sync_cvr::CvrError`) at the trait boundary via `anyhow`.
#[derive(Debug, Error)]
pub enum SledError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("encode/decode error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(String),
}
