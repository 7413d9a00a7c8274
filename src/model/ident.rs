//! Whitelists for everything that is interpolated into SQL text.
//!
//! Values always travel as bound parameters. Names cannot, so every table,
//! column, operator, join kind, and sort direction is checked here before it
//! reaches a query string.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::QueryError;

static TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern compiles"));

static COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)?$").expect("identifier pattern compiles")
});

static TABLE_WILDCARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+\.\*$").expect("identifier pattern compiles"));

/// Accepts `name`.
pub(crate) fn table(name: &str) -> Result<&str, QueryError> {
    if TABLE.is_match(name) {
        Ok(name)
    } else {
        Err(QueryError::InvalidTable(name.to_owned()))
    }
}

/// Accepts `name` or `table.name`.
pub(crate) fn column(name: &str) -> Result<&str, QueryError> {
    if COLUMN.is_match(name) {
        Ok(name)
    } else {
        Err(QueryError::InvalidColumn(name.to_owned()))
    }
}

/// Accepts a bare attribute name, as used for INSERT/UPDATE columns and
/// their placeholders. A leading `__` is reserved for internal bindings.
pub(crate) fn attribute(name: &str) -> Result<&str, QueryError> {
    if TABLE.is_match(name) && !name.starts_with("__") {
        Ok(name)
    } else {
        Err(QueryError::InvalidColumn(name.to_owned()))
    }
}

/// Accepts anything [`column`] does, plus `*` and `table.*`.
pub(crate) fn select_item(name: &str) -> Result<&str, QueryError> {
    if name == "*" || TABLE_WILDCARD.is_match(name) {
        Ok(name)
    } else {
        column(name)
    }
}

/// Comparison operators allowed in `WHERE` and `JOIN ... ON`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Operator {
    pub fn parse(op: &str) -> Result<Self, QueryError> {
        Ok(match op {
            "=" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            other => return Err(QueryError::InvalidOperator(other.to_owned())),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    /// Only the exact keywords `INNER`, `LEFT` and `RIGHT` are accepted.
    pub fn parse(kind: &str) -> Result<Self, QueryError> {
        match kind {
            "INNER" => Ok(Self::Inner),
            "LEFT" => Ok(Self::Left),
            "RIGHT" => Ok(Self::Right),
            other => Err(QueryError::InvalidJoinType(other.to_owned())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Case-insensitive: `desc`, `Desc` and `DESC` are the same direction.
    pub fn parse(direction: &str) -> Result<Self, QueryError> {
        match direction.to_ascii_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(QueryError::InvalidDirection(direction.to_owned())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}
