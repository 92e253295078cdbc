//! Incremental view materialization (§4.E) and the query compiler that
//! turns a declarative `Select` AST into a runnable operator graph (§4.F).
//! Operators are a closed variant set — `Source`, `Filter`, `Join`,
//! `Reduce`, `TreeView`, `Concat`, `Distinct`, plus the test-only `Catch`
//! sink — each with a `push`/`hydrate` capability surface rather than an
//! open inheritance hierarchy (§9 "Polymorphism over operators").

pub mod catch;
pub mod compiler;
pub mod delta;
pub mod distinct;
pub mod error;
pub mod filter;
pub mod join;
pub mod reduce;
pub mod source;
pub mod treeview;

pub use catch::Catch;
pub use compiler::{compile, Catalog, Pipeline};
pub use delta::{collapse, Delta, DeltaEntry, Node};
pub use error::{CompileError, EvalError, PipelineError};
pub use source::{RowChange, Source};
