use thiserror::Error;

use crate::ast::FieldPath;

/// Errors raised while compiling a condition's `LIKE`/`ILIKE` pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LikeError {
    #[error("pattern ends with an unescaped backslash")]
    TrailingEscape,
}

/// Errors raised while evaluating a `Condition` tree against a row.
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("field not found: {0}")]
    FieldNotFound(FieldPath),
    #[error("operator {op:?} is not defined for this value type")]
    TypeMismatch { op: crate::ast::CompareOp },
    #[error(transparent)]
    Like(#[from] LikeError),
}
