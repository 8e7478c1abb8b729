//! Typed cell values for query results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::ColumnKind;

/// A single typed value in a result cell or label map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
}

impl Scalar {
    /// The column kind this value belongs to.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Scalar::Bool(_) => ColumnKind::Bool,
            Scalar::Int(_) => ColumnKind::Int,
            Scalar::Float(_) => ColumnKind::Float,
            Scalar::Str(_) => ColumnKind::Str,
            Scalar::Time(_) => ColumnKind::Time,
        }
    }

    /// The boolean payload, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Str(s) => f.write_str(s),
            Scalar::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Scalar::Bool(true).kind(), ColumnKind::Bool);
        assert_eq!(Scalar::Int(7).kind(), ColumnKind::Int);
        assert_eq!(Scalar::Float(0.5).kind(), ColumnKind::Float);
        assert_eq!(Scalar::from("api").kind(), ColumnKind::Str);
    }

    #[test]
    fn as_bool_only_for_booleans() {
        assert_eq!(Scalar::Bool(false).as_bool(), Some(false));
        assert_eq!(Scalar::Int(1).as_bool(), None);
        assert_eq!(Scalar::from("true").as_bool(), None);
    }

    #[test]
    fn display_renders_plain_values() {
        assert_eq!(Scalar::Bool(true).to_string(), "true");
        assert_eq!(Scalar::Int(-3).to_string(), "-3");
        assert_eq!(Scalar::from("web-1").to_string(), "web-1");
    }
}
