//! A [`Database`] double that records statements and replays canned rows.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use serde_json::Value;

use crate::database::{Bindings, Database, DatabaseError, Row};

use super::Attributes;

pub(crate) fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

#[derive(Default)]
pub(crate) struct RecordingDatabase {
    statements: RefCell<Vec<(String, Bindings)>>,
    results: RefCell<VecDeque<Vec<Row>>>,
    next_id: Cell<i64>,
    failing: Cell<bool>,
}

impl RecordingDatabase {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues the rows returned by the next `query` call.
    pub(crate) fn returning(&self, rows: Vec<Value>) -> &Self {
        self.results
            .borrow_mut()
            .push_back(rows.into_iter().map(attrs).collect());
        self
    }

    pub(crate) fn with_insert_id(&self, id: i64) -> &Self {
        self.next_id.set(id);
        self
    }

    /// Makes every later statement fail.
    pub(crate) fn fail(&self) {
        self.failing.set(true);
    }

    pub(crate) fn statements(&self) -> Vec<(String, Bindings)> {
        self.statements.borrow().clone()
    }

    pub(crate) fn last_statement(&self) -> Option<(String, Bindings)> {
        self.statements.borrow().last().cloned()
    }

    fn record(&self, sql: &str, bindings: &Bindings) -> Result<(), DatabaseError> {
        self.statements
            .borrow_mut()
            .push((sql.to_owned(), bindings.clone()));
        if self.failing.get() {
            return Err(DatabaseError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }
}

impl Database for RecordingDatabase {
    fn query(&self, sql: &str, bindings: &Bindings) -> Result<Vec<Row>, DatabaseError> {
        self.record(sql, bindings)?;
        Ok(self.results.borrow_mut().pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, bindings: &Bindings) -> Result<usize, DatabaseError> {
        self.record(sql, bindings)?;
        Ok(1)
    }

    fn last_insert_id(&self) -> Result<i64, DatabaseError> {
        Ok(self.next_id.get())
    }

    fn begin_transaction(&self) -> Result<(), DatabaseError> {
        self.record("BEGIN", &Bindings::new())
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        self.record("COMMIT", &Bindings::new())
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        self.record("ROLLBACK", &Bindings::new())
    }
}
