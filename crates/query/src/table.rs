//! Tabular result shapes.
//!
//! A [`Table`] is a declared list of typed columns plus zero or more rows of
//! [`Scalar`] cells. Producers declare the column types; consumers validate
//! rows against the declaration before trusting them.

use serde::{Deserialize, Serialize};

use crate::value::Scalar;

/// The type of a single result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Str,
    Time,
}

/// A named, typed column in a result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A typed table of query results.
///
/// Rows are not validated on construction; call [`Table::check_row`] (or let
/// the consumer do so) before interpreting cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Scalar>>,
}

impl Table {
    /// Create an empty table with the given column declaration.
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row (builder style, used heavily in tests).
    pub fn with_row(mut self, row: Vec<Scalar>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check one row against the declared columns: width must match and every
    /// cell must carry its column's kind.
    pub fn check_row(&self, row: &[Scalar]) -> Result<(), RowShapeError> {
        if row.len() != self.columns.len() {
            return Err(RowShapeError::Width {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        for (cell, column) in row.iter().zip(&self.columns) {
            if cell.kind() != column.kind {
                return Err(RowShapeError::Kind {
                    column: column.name.clone(),
                    expected: column.kind,
                    got: cell.kind(),
                });
            }
        }
        Ok(())
    }
}

/// A row that does not match its table's column declaration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowShapeError {
    #[error("row has {got} cells, table declares {expected} columns")]
    Width { expected: usize, got: usize },

    #[error("column '{column}' declares {expected:?}, cell is {got:?}")]
    Kind {
        column: String,
        expected: ColumnKind,
        got: ColumnKind,
    },
}
