use thiserror::Error;

#[derive(Debug, Error)]
pub enum CvrError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("unknown query hash `{0}` in patch")]
    UnknownQuery(sync_proto::QueryHash),
    #[error("put patch for `{0}` is missing its ast")]
    MissingAst(sync_proto::QueryHash),
}
