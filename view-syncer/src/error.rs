use thiserror::Error;

use sync_proto::ErrorKind;

/// Typed errors the View Syncer cancels a downstream sequence with
/// (§4.H "Failure semantics"), mapped 1:1 onto the wire `ErrorKind`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("invalid push: {0}")]
    InvalidPush(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("mutation failed: {0}")]
    MutationFailed(String),
    #[error("value outside the wire format's representable-integer range: {0}")]
    Representability(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Internal(_) => ErrorKind::Internal,
            SyncError::InvalidPush(_) => ErrorKind::InvalidPush,
            SyncError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            SyncError::MutationFailed(_) => ErrorKind::MutationFailed,
            SyncError::Representability(_) => ErrorKind::Representability,
        }
    }

    pub fn detail(&self) -> String { self.to_string() }
}

impl From<sync_ivm::CompileError> for SyncError {
    fn from(e: sync_ivm::CompileError) -> Self { SyncError::InvalidMessage(e.to_string()) }
}

impl From<sync_ivm::PipelineError> for SyncError {
    fn from(e: sync_ivm::PipelineError) -> Self { SyncError::Internal(e.to_string()) }
}

impl From<sync_cvr::CvrError> for SyncError {
    fn from(e: sync_cvr::CvrError) -> Self { SyncError::Internal(e.to_string()) }
}

impl From<sync_streamer::StreamError> for SyncError {
    fn from(e: sync_streamer::StreamError) -> Self { SyncError::Internal(e.to_string()) }
}
