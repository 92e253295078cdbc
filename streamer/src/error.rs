use thiserror::Error;

/// Errors from a `ChangeSource` (§4.A). Distinguishes a retryable
/// disconnect from a fatal policy violation (unsupported replica
/// identity, unknown message tag, unrecognized user type).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream disconnected: {0}")]
    Disconnected(String),
    #[error("published table has REPLICA IDENTITY FULL, only DEFAULT is supported")]
    UnsupportedReplicaIdentity,
    #[error("unknown replication message tag `{0}`")]
    UnknownTag(String),
    #[error("unsupported user-defined type `{0}`")]
    UnsupportedType(String),
}

impl SourceError {
    /// Per §4.A "Failure": disconnects are retried with backoff; policy
    /// violations are fatal and must not be retried.
    pub fn is_retryable(&self) -> bool { matches!(self, SourceError::Disconnected(_)) }
}

/// Errors from the Change Log Store (§4.B).
#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("encode/decode error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Errors from the Change Streamer Service (§4.C).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("replica version mismatch: expected {expected}, got {got}")]
    ReplicaVersionMismatch { expected: String, got: String },
    #[error(transparent)]
    LogStore(#[from] LogStoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("subscriber cancelled: buffer overflow")]
    SubscriberOverflow,
}

/// Errors from the Replica Store (§4.D).
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("unknown table `{0}`")]
    UnknownTable(String),
}
