use thiserror::Error;

/// Errors surfaced by a [`Queryable`](crate::Queryable) implementation.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid cursor: {0}")]
    Cursor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
