//! Query engine contract consumed by the rest of the workspace.
//!
//! This crate defines the shapes a query engine must produce — typed tabular
//! results, pagination cursors, execution metrics — and the [`Queryable`]
//! trait through which consumers (notably alert evaluation) run expressions.
//! The engine itself lives behind the trait; nothing here executes queries.

pub mod engine;
pub mod error;
pub mod table;
pub mod value;

pub use engine::{Data, Expr, QueryMetrics, QueryResponse, Queryable};
pub use error::QueryError;
pub use table::{Column, ColumnKind, Table};
pub use value::Scalar;
