//! The fluent `SELECT` builder and the terminal operations built on it.

use std::marker::PhantomData;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::database::{Bindings, Database};

use super::ident::{self, Direction, JoinKind, Operator};
use super::{Attributes, Entity, ModelError, QueryError, Schema};

const COUNT_ALIAS: &str = "total";

/// The accumulated clauses of one query. Every string in here has already
/// been through the identifier whitelist.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct QueryParts {
    select: Option<String>,
    joins: Vec<String>,
    wheres: Vec<String>,
    orders: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryParts {
    fn compile(&self, table: &str, default_select: &str) -> String {
        let mut sql = format!(
            "SELECT {} FROM {table}",
            self.select.as_deref().unwrap_or(default_select)
        );
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.wheres.join(" AND "));
        }
        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.orders.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }
}

// Rewrites the parts for a `COUNT(*)` and puts the originals back on drop,
// including when the count fails.
struct CountScope<'a> {
    parts: &'a mut QueryParts,
    saved: QueryParts,
}

impl<'a> CountScope<'a> {
    fn enter(parts: &'a mut QueryParts) -> Self {
        let saved = parts.clone();
        parts.select = Some(format!("COUNT(*) AS {COUNT_ALIAS}"));
        parts.orders.clear();
        parts.limit = None;
        parts.offset = None;
        Self { parts, saved }
    }
}

impl Drop for CountScope<'_> {
    fn drop(&mut self) {
        *self.parts = std::mem::take(&mut self.saved);
    }
}

/// One page of results plus the numbers needed to render a pager.
#[derive(Serialize)]
#[serde(bound = "")]
pub struct Page<S: Schema> {
    pub data: Vec<Entity<S>>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

/// A `SELECT` under construction against `S`'s table.
///
/// Builder methods validate their identifiers and either extend the query
/// or fail with a [`QueryError`], leaving the query as it was. Values are
/// never placed in the SQL text; each `where_*` call binds its value as
/// `:w0`, `:w1`, ... in call order.
///
/// ```
/// # use sprig::database::SqliteDatabase;
/// # use sprig::model::Schema;
/// struct User;
/// impl Schema for User {}
///
/// let db = SqliteDatabase::in_memory();
/// let mut query = User::query(&db);
/// query.where_eq("name", "x")?.where_op("age", ">", 18)?;
/// assert_eq!(
///     query.to_sql()?,
///     "SELECT * FROM users WHERE name = :w0 AND age > :w1"
/// );
/// # Ok::<(), sprig::model::QueryError>(())
/// ```
pub struct Query<'db, S> {
    db: &'db dyn Database,
    parts: QueryParts,
    bindings: Bindings,
    next_placeholder: usize,
    schema: PhantomData<fn() -> S>,
}

impl<'db, S: Schema> Query<'db, S> {
    pub fn new(db: &'db dyn Database) -> Self {
        Self {
            db,
            parts: QueryParts::default(),
            bindings: Bindings::new(),
            next_placeholder: 0,
            schema: PhantomData,
        }
    }

    /// Replaces the select list. An empty list selects `*`.
    pub fn select(&mut self, columns: &[&str]) -> Result<&mut Self, QueryError> {
        let list = select_list(columns)?;
        self.parts.select = Some(list);
        Ok(self)
    }

    /// Adds `<kind> JOIN table ON first op second`. `kind` must be exactly
    /// `INNER`, `LEFT` or `RIGHT`.
    pub fn join(
        &mut self,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
        kind: &str,
    ) -> Result<&mut Self, QueryError> {
        let kind = JoinKind::parse(kind)?;
        let table = ident::table(table)?;
        let first = ident::column(first)?;
        let operator = Operator::parse(operator)?;
        let second = ident::column(second)?;
        self.parts.joins.push(format!(
            "{} JOIN {table} ON {first} {operator} {second}",
            kind.as_str()
        ));
        Ok(self)
    }

    pub fn inner_join(
        &mut self,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<&mut Self, QueryError> {
        self.join(table, first, operator, second, JoinKind::Inner.as_str())
    }

    pub fn left_join(
        &mut self,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<&mut Self, QueryError> {
        self.join(table, first, operator, second, JoinKind::Left.as_str())
    }

    /// `column = value`.
    pub fn where_eq(
        &mut self,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, QueryError> {
        self.where_op(column, Operator::Eq.as_str(), value)
    }

    /// `column <op> value`, where `op` is one of `= != < > <= >=`.
    pub fn where_op(
        &mut self,
        column: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, QueryError> {
        let column = ident::column(column)?;
        let operator = Operator::parse(operator)?;

        let placeholder = format!(":w{}", self.next_placeholder);
        self.next_placeholder += 1;
        self.parts
            .wheres
            .push(format!("{column} {operator} {placeholder}"));
        self.bindings.bind(placeholder, value);
        Ok(self)
    }

    pub fn order_by(&mut self, column: &str, direction: &str) -> Result<&mut Self, QueryError> {
        let column = ident::column(column)?;
        let direction = Direction::parse(direction)?;
        self.parts
            .orders
            .push(format!("{column} {}", direction.as_str()));
        Ok(self)
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.parts.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.parts.offset = Some(offset);
        self
    }

    /// The SQL the next `get` would run.
    pub fn to_sql(&self) -> Result<String, QueryError> {
        let table = super::validated_table::<S>()?;
        let default_select = select_list(S::COLUMNS)?;
        Ok(self.parts.compile(&table, &default_select))
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Runs the query and hydrates every row.
    pub fn get(&self) -> Result<Vec<Entity<S>>, ModelError> {
        let sql = self.to_sql()?;
        debug!(%sql, bindings = self.bindings.len(), "select");
        let rows = self.db.query(&sql, &self.bindings)?;
        Ok(rows.into_iter().map(Entity::from_row).collect())
    }

    /// Same as [`Query::get`].
    pub fn all(&self) -> Result<Vec<Entity<S>>, ModelError> {
        self.get()
    }

    /// Limits the query to one row and returns it, if any.
    pub fn first(&mut self) -> Result<Option<Entity<S>>, ModelError> {
        self.limit(1);
        Ok(self.get()?.into_iter().next())
    }

    /// Adds `primary_key = id` and returns the first match.
    pub fn find(&mut self, id: impl Into<Value>) -> Result<Option<Entity<S>>, ModelError> {
        self.where_eq(S::PRIMARY_KEY, id)?;
        self.first()
    }

    /// Counts the rows matching the current joins and conditions.
    ///
    /// Ordering, limit and offset are ignored for the count and are in
    /// place again afterwards, so the same query can go on to fetch rows.
    pub fn count(&mut self) -> Result<u64, ModelError> {
        let table = super::validated_table::<S>()?;
        let scope = CountScope::enter(&mut self.parts);
        let sql = scope.parts.compile(&table, "*");
        trace!(%sql, "count");

        let rows = self.db.query(&sql, &self.bindings)?;
        let total = rows
            .first()
            .and_then(|row| row.get(COUNT_ALIAS))
            .and_then(aggregate_value)
            .ok_or(ModelError::MissingAggregate(COUNT_ALIAS))?;
        Ok(total)
    }

    /// Fetches page `page` (1-based) of `per_page` rows.
    ///
    /// `page` below 1 is treated as 1 and `per_page` below 1 as 1. Pages past
    /// the end come back with no data.
    pub fn paginate(&mut self, page: u64, per_page: u64) -> Result<Page<S>, ModelError> {
        let current_page = page.max(1);
        let per_page = per_page.max(1);

        let total = self.count()?;
        let offset = (current_page - 1).saturating_mul(per_page);
        self.limit(per_page).offset(offset);
        let data = self.get()?;

        Ok(Page {
            data,
            meta: PageMeta {
                total,
                per_page,
                current_page,
                last_page: total.div_ceil(per_page),
            },
        })
    }

    /// Inserts the fillable part of `data` and reads the new row back.
    ///
    /// Returns `None`, without running any SQL, when nothing in `data` is
    /// fillable. The read-back uses a fresh query, so conditions on this one
    /// do not apply to it.
    pub fn create(&self, data: Attributes) -> Result<Option<Entity<S>>, ModelError> {
        let attributes = Entity::<S>::new().fill(data).into_attributes();
        if attributes.is_empty() {
            debug!(table = %S::table(), "create skipped: nothing fillable");
            return Ok(None);
        }
        let id = super::insert_row::<S>(self.db, &attributes)?;
        Query::<S>::new(self.db).find(id)
    }

    /// Updates the row keyed by `id` with the fillable part of `data`.
    /// `false` means nothing was fillable and no SQL ran.
    pub fn update(&self, id: impl Into<Value>, data: Attributes) -> Result<bool, ModelError> {
        let attributes = Entity::<S>::new().fill(data).into_attributes();
        super::update_row::<S>(self.db, &id.into(), &attributes)
    }

    pub fn delete(&self, id: impl Into<Value>) -> Result<bool, ModelError> {
        super::delete_row::<S>(self.db, &id.into())
    }
}

fn select_list(columns: &[&str]) -> Result<String, QueryError> {
    if columns.is_empty() {
        return Ok("*".to_owned());
    }
    let checked = columns
        .iter()
        .map(|column| ident::select_item(column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checked.join(", "))
}

// SQLite hands COUNT back as an integer; other drivers may use a string.
fn aggregate_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::model::testing::{RecordingDatabase, attrs};
    use serde_json::json;

    struct User;
    impl Schema for User {
        const FILLABLE: &'static [&'static str] = &["name", "email", "age"];
        const HIDDEN: &'static [&'static str] = &["email"];
    }

    struct Listing;
    impl Schema for Listing {
        const COLUMNS: &'static [&'static str] = &["id", "title"];
    }

    #[test]
    fn where_clauses_bind_in_call_order() {
        let db = RecordingDatabase::new();
        let mut query = User::query(&db);
        query
            .where_eq("name", "x")
            .unwrap()
            .where_op("age", ">", 18)
            .unwrap();

        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT * FROM users WHERE name = :w0 AND age > :w1"
        );
        assert_eq!(query.bindings().get(":w0"), Some(&json!("x")));
        assert_eq!(query.bindings().get(":w1"), Some(&json!(18)));
        assert_eq!(query.bindings().len(), 2);
    }

    #[test]
    fn rejected_identifiers_leave_the_query_untouched() {
        let db = RecordingDatabase::new();
        let mut query = User::query(&db);
        let err = query.where_eq("price;DROP", 1).err().unwrap();
        assert_eq!(err, QueryError::InvalidColumn("price;DROP".into()));
        assert!(query.bindings().is_empty());

        assert!(matches!(
            query.where_op("age", "LIKE", 1),
            Err(QueryError::InvalidOperator(_))
        ));
        assert!(matches!(
            query.order_by("name", "sideways"),
            Err(QueryError::InvalidDirection(_))
        ));
        assert!(matches!(
            query.join("posts", "posts.user_id", "=", "users.id", "CROSS"),
            Err(QueryError::InvalidJoinType(_))
        ));
        assert!(matches!(
            query.join("posts p", "p.user_id", "=", "users.id", "INNER"),
            Err(QueryError::InvalidTable(_))
        ));
        assert!(matches!(
            query.select(&["COUNT(*)"]),
            Err(QueryError::InvalidColumn(_))
        ));
        assert_eq!(query.to_sql().unwrap(), "SELECT * FROM users");
        assert!(query.bindings().is_empty());

        // the next successful where still starts at :w0
        query.where_eq("name", "x").unwrap();
        assert_eq!(query.to_sql().unwrap(), "SELECT * FROM users WHERE name = :w0");
    }

    #[test]
    fn clauses_compile_in_sql_order() {
        let db = RecordingDatabase::new();
        let mut query = User::query(&db);
        query
            .order_by("users.name", "desc")
            .unwrap()
            .select(&["users.*", "posts.title"])
            .unwrap()
            .left_join("posts", "posts.user_id", "=", "users.id")
            .unwrap()
            .where_op("posts.views", ">=", 10)
            .unwrap()
            .limit(5)
            .offset(10);

        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT users.*, posts.title FROM users \
             LEFT JOIN posts ON posts.user_id = users.id \
             WHERE posts.views >= :w0 ORDER BY users.name DESC LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn schema_columns_are_the_default_select() {
        let db = RecordingDatabase::new();
        let query = Listing::query(&db);
        assert_eq!(query.to_sql().unwrap(), "SELECT id, title FROM listings");
    }

    #[test]
    fn count_keeps_order_limit_and_offset() {
        let db = RecordingDatabase::new();
        db.returning(vec![json!({"total": 3})]);

        let mut query = User::query(&db);
        query
            .where_eq("name", "x")
            .unwrap()
            .order_by("id", "asc")
            .unwrap()
            .limit(2)
            .offset(4);
        let before = query.parts.clone();

        assert_eq!(query.count().unwrap(), 3);
        let (sql, bindings) = db.last_statement().unwrap();
        assert_eq!(sql, "SELECT COUNT(*) AS total FROM users WHERE name = :w0");
        assert_eq!(bindings.get(":w0"), Some(&json!("x")));

        assert_eq!(query.parts, before);
        query.get().unwrap();
        let (sql, _) = db.last_statement().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE name = :w0 ORDER BY id ASC LIMIT 2 OFFSET 4"
        );
    }

    #[test]
    fn failed_count_still_restores_the_query() {
        let db = RecordingDatabase::new();
        db.fail();
        let mut query = User::query(&db);
        query.select(&["id"]).unwrap().limit(7);
        let before = query.parts.clone();

        assert!(matches!(query.count(), Err(ModelError::Database(_))));
        assert_eq!(query.parts, before);
    }

    #[test]
    fn count_without_aggregate_column_is_an_error() {
        let db = RecordingDatabase::new();
        db.returning(vec![]);
        let mut query = User::query(&db);
        assert!(matches!(
            query.count(),
            Err(ModelError::MissingAggregate("total"))
        ));
    }

    #[test]
    fn page_zero_is_page_one() {
        let db = RecordingDatabase::new();
        db.returning(vec![json!({"total": 25})])
            .returning(vec![json!({"id": 1})]);
        let zero = User::query(&db).paginate(0, 10).unwrap();

        db.returning(vec![json!({"total": 25})])
            .returning(vec![json!({"id": 1})]);
        let one = User::query(&db).paginate(1, 10).unwrap();

        assert_eq!(zero.meta, one.meta);
        assert_eq!(
            one.meta,
            PageMeta {
                total: 25,
                per_page: 10,
                current_page: 1,
                last_page: 3,
            }
        );
        let statements = db.statements();
        assert_eq!(statements[1].0, statements[3].0);
        assert_eq!(statements[3].0, "SELECT * FROM users LIMIT 10 OFFSET 0");
    }

    #[test]
    fn empty_tables_have_no_pages() {
        let db = RecordingDatabase::new();
        db.returning(vec![json!({"total": 0})]);
        let page = User::query(&db).paginate(3, 0).unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.meta.per_page, 1);
        assert_eq!(page.meta.last_page, 0);
        assert_eq!(
            db.last_statement().unwrap().0,
            "SELECT * FROM users LIMIT 1 OFFSET 2"
        );
    }

    #[test]
    fn create_with_nothing_fillable_runs_no_sql() {
        let db = RecordingDatabase::new();
        assert!(User::query(&db).create(Attributes::new()).unwrap().is_none());
        assert!(
            User::query(&db)
                .create(attrs(json!({"is_admin": true})))
                .unwrap()
                .is_none()
        );
        assert!(db.statements().is_empty());
    }

    #[test]
    fn create_reads_back_with_a_fresh_query() {
        let db = RecordingDatabase::new();
        db.with_insert_id(12)
            .returning(vec![json!({"id": 12, "name": "Ana"})]);

        let mut query = User::query(&db);
        query.where_eq("name", "someone else").unwrap();
        let created = query
            .create(attrs(json!({"name": "Ana", "is_admin": true})))
            .unwrap()
            .unwrap();
        assert_eq!(created.id(), Some(&json!(12)));

        let statements = db.statements();
        assert_eq!(statements[0].0, "INSERT INTO users (name) VALUES (:name)");
        assert_eq!(statements[1].0, "SELECT * FROM users WHERE id = :w0 LIMIT 1");
        assert_eq!(statements[1].1.get(":w0"), Some(&json!(12)));
    }

    #[test]
    fn update_by_id_filters_and_binds_key() {
        let db = RecordingDatabase::new();
        let updated = User::query(&db)
            .update(5, attrs(json!({"name": "Bia", "id": 99})))
            .unwrap();
        assert!(updated);
        let (sql, bindings) = db.last_statement().unwrap();
        assert_eq!(sql, "UPDATE users SET name = :name WHERE id = :__pk");
        assert_eq!(bindings.get(":__pk"), Some(&json!(5)));
        assert_eq!(bindings.get(":id"), None);
    }

    fn sqlite_with_users() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory();
        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, email TEXT, age INTEGER)",
            &Bindings::new(),
        )
        .unwrap();
        db
    }

    #[test]
    fn full_lifecycle_against_sqlite() {
        let db = sqlite_with_users();
        for (name, age) in [("ana", 31), ("bia", 17), ("caio", 45), ("duda", 22)] {
            User::query(&db)
                .create(attrs(json!({"name": name, "email": format!("{name}@x.io"), "age": age})))
                .unwrap()
                .unwrap();
        }

        let mut adults = User::query(&db);
        adults
            .where_op("age", ">=", 18)
            .unwrap()
            .order_by("name", "ASC")
            .unwrap();
        let page = adults.paginate(2, 2).unwrap();
        assert_eq!(page.meta.total, 3);
        assert_eq!(page.meta.last_page, 2);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].get("name"), Some(&json!("duda")));
        assert!(!page.data[0].to_array().contains_key("email"));

        let mut bia = User::query(&db).find(2).unwrap().unwrap();
        assert!(bia.update(&db, attrs(json!({"age": 18}))).unwrap());
        assert_eq!(adults.count().unwrap(), 4);

        assert!(User::query(&db).delete(1).unwrap());
        assert!(User::query(&db).find(1).unwrap().is_none());
        assert_eq!(User::query(&db).all().unwrap().len(), 3);

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["meta"]["current_page"], json!(2));
        assert_eq!(json["data"][0], json!({"id": 4, "name": "duda", "age": 22}));
    }
}
