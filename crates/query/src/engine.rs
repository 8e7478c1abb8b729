//! The [`Queryable`] contract and its request/response types.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::table::Table;
use crate::value::Scalar;

/// A query expression.
///
/// The text has already been through the parser by the time it reaches a
/// consumer; this type is an opaque handle the engine knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expr(String);

impl Expr {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The payload of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Data {
    /// Tabular results (the shape alert evaluation consumes).
    Table(Table),
    /// A free-standing scalar (e.g. a count without grouping).
    Scalar(Scalar),
}

impl Data {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Data::Table(t) => Some(t),
            _ => None,
        }
    }
}

/// Execution metrics reported alongside every query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueryMetrics {
    /// Rows the engine scanned to answer the query.
    pub rows_scanned: u64,
    /// Rows present in the returned page.
    pub rows_returned: u64,
    /// Wall-clock execution time.
    pub total_latency: Duration,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub data: Data,
    /// Opaque cursor for the next page; `None` when the result is exhausted.
    pub next_cursor: Option<String>,
    pub metrics: QueryMetrics,
}

/// An engine that can execute parsed expressions.
///
/// Implementations may perform I/O; calls are serialized per consumer but may
/// run concurrently across consumers, so implementations must be `Sync`.
#[async_trait]
pub trait Queryable: Send + Sync {
    /// Execute `expr`, returning at most `limit` rows starting at `cursor`.
    async fn query(
        &self,
        expr: &Expr,
        cursor: Option<&str>,
        limit: u64,
    ) -> Result<QueryResponse, QueryError>;
}
