use thiserror::Error;

/// Errors raised while decoding a wire message or a durable record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed upstream message: {0}")]
    InvalidMessage(String),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}
