use thiserror::Error;

use sync_ql::FieldPath;

/// Errors raised while compiling a `Select` AST into an operator graph
/// (§4.F).
#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("unknown column `{0}` referenced in query")]
    UnknownColumn(FieldPath),
    #[error("limit must be a non-negative integer, got {0}")]
    InvalidLimit(i64),
    #[error("aggregate {0:?} is not valid outside of group by")]
    AggregateRequiresGroupBy(sync_ql::AggregateFunc),
    #[error("unknown table `{0}`")]
    UnknownTable(String),
}

/// Errors raised while executing the operator graph (§4.E).
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Filter(#[from] sync_ql::error::FilterError),
}

/// Errors a running `Pipeline` can raise on a live commit, as distinct from
/// the synchronous `CompileError`s raised once at subscribe time (§4.F
/// "Errors", §4.H "An error inside the pipeline while producing a poke").
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Eval(#[from] EvalError),
}
