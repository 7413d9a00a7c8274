//! Database layer: the collaborator the query builder executes through.
//!
//! The [`Database`] trait is deliberately small: parameterised reads and
//! writes, the last generated row id, and caller-driven transactions. There is
//! no raw, unparameterised entry point. Every statement carries a [`Bindings`]
//! map of named placeholders, even when it is empty.
//!
//! [`SqliteDatabase`] is the shipped backend.

use serde_json::{Map, Value};
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteDatabase;

/// One result row: column name → value, in select order.
pub type Row = Map<String, Value>;

/// Errors surfaced by a database backend. They are never retried.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to open database {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Named placeholder values for one statement, in binding order.
///
/// Names include their leading `:` so they can be handed to the driver
/// unchanged. Binding a name that is already present replaces its value.
///
/// # Examples
///
/// ```
/// use sprig::database::Bindings;
/// use serde_json::json;
///
/// let mut bindings = Bindings::new();
/// bindings.bind(":w0", "x");
/// bindings.bind(":w1", 18);
/// assert_eq!(bindings.get(":w1"), Some(&json!(18)));
/// assert_eq!(bindings.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// A connection the query builder can run statements against.
///
/// Implementations hold a single connection for their whole lifetime and do
/// not pool. Transactions are only ever opened by the caller.
pub trait Database {
    /// Runs a statement that returns rows.
    fn query(&self, sql: &str, bindings: &Bindings) -> Result<Vec<Row>, DatabaseError>;

    /// Runs a statement that does not return rows; returns the affected row count.
    fn execute(&self, sql: &str, bindings: &Bindings) -> Result<usize, DatabaseError>;

    /// Row id generated by the most recent successful `INSERT`.
    fn last_insert_id(&self) -> Result<i64, DatabaseError>;

    fn begin_transaction(&self) -> Result<(), DatabaseError>;

    fn commit(&self) -> Result<(), DatabaseError>;

    fn rollback(&self) -> Result<(), DatabaseError>;
}
