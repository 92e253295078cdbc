//! Query AST, comparison evaluator and `LIKE`-pattern compiler shared by the
//! query compiler and every IVM operator that needs to test a row against a
//! condition tree.

pub mod ast;
pub mod error;
pub mod like;
pub mod selection;

pub use ast::{AggregateExpr, AggregateFunc, CompareOp, Condition, DistinctClause, FieldPath, Join, JoinKind, OrderByItem, OrderDirection, Select, Value};
pub use error::{FilterError, LikeError};
