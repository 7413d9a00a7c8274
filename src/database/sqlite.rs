//! SQLite backend built on `rusqlite`.

use once_cell::unsync::OnceCell;
use rusqlite::types::{ToSql, Value as SqlValue};
use rusqlite::Connection;
use serde_json::{Number, Value};
use tracing::{debug, trace};

use super::{Bindings, Database, DatabaseError, Row};

const IN_MEMORY: &str = ":memory:";

/// A lazily opened SQLite connection.
///
/// The file is not touched until the first statement runs. After that the
/// same connection serves every statement, and prepared statements are kept
/// in rusqlite's statement cache.
///
/// Values map as follows:
///
/// | JSON            | SQLite            | read back as         |
/// |-----------------|-------------------|----------------------|
/// | `null`          | `NULL`            | `null`               |
/// | bool            | `INTEGER` 0/1     | number               |
/// | integer / float | `INTEGER`/`REAL`  | number               |
/// | string          | `TEXT`            | string               |
/// | array / object  | `TEXT` (JSON)     | string               |
/// | —               | `BLOB`            | lowercase hex string |
pub struct SqliteDatabase {
    path: String,
    connection: OnceCell<Connection>,
}

impl SqliteDatabase {
    /// A database stored at `path`; `":memory:"` selects a private in-memory one.
    pub fn open(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            connection: OnceCell::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::open(IN_MEMORY)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `true` once the first statement has opened the connection.
    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some()
    }

    fn connection(&self) -> Result<&Connection, DatabaseError> {
        self.connection.get_or_try_init(|| {
            debug!(path = %self.path, "opening sqlite connection");
            let opened = if self.path == IN_MEMORY {
                Connection::open_in_memory()
            } else {
                Connection::open(&self.path)
            };
            opened.map_err(|source| DatabaseError::Connect {
                path: self.path.clone(),
                source,
            })
        })
    }
}

impl Database for SqliteDatabase {
    fn query(&self, sql: &str, bindings: &Bindings) -> Result<Vec<Row>, DatabaseError> {
        trace!(sql, bindings = bindings.len(), "query");
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

        let values = to_sql_values(bindings);
        let params = as_params(&values);
        let mut rows = stmt.query(params.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (index, column) in columns.iter().enumerate() {
                let value: SqlValue = row.get(index)?;
                record.insert(column.clone(), from_sql(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, bindings: &Bindings) -> Result<usize, DatabaseError> {
        trace!(sql, bindings = bindings.len(), "execute");
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let values = to_sql_values(bindings);
        let params = as_params(&values);
        Ok(stmt.execute(params.as_slice())?)
    }

    fn last_insert_id(&self) -> Result<i64, DatabaseError> {
        Ok(self.connection()?.last_insert_rowid())
    }

    fn begin_transaction(&self) -> Result<(), DatabaseError> {
        debug!("begin transaction");
        Ok(self.connection()?.execute_batch("BEGIN")?)
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        debug!("commit");
        Ok(self.connection()?.execute_batch("COMMIT")?)
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        debug!("rollback");
        Ok(self.connection()?.execute_batch("ROLLBACK")?)
    }
}

fn to_sql_values(bindings: &Bindings) -> Vec<(&str, SqlValue)> {
    bindings
        .iter()
        .map(|(name, value)| (name, to_sql(value)))
        .collect()
}

fn as_params<'a>(values: &'a [(&'a str, SqlValue)]) -> Vec<(&'a str, &'a dyn ToSql)> {
    values
        .iter()
        .map(|(name, value)| (*name, value as &dyn ToSql))
        .collect()
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}
