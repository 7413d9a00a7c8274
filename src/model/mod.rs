//! Models: schema metadata, hydrated entities, and the fluent query builder.
//!
//! A model is a zero-sized marker type implementing [`Schema`]. The schema
//! names the table and lists the mass-assignable and hidden columns. Rows come
//! back as [`Entity<S>`] values, which are attribute maps tagged with their
//! schema.
//!
//! ```
//! use serde_json::json;
//! use sprig::database::{Database, SqliteDatabase, Bindings};
//! use sprig::model::{Schema, Attributes};
//!
//! struct User;
//!
//! impl Schema for User {
//!     const FILLABLE: &'static [&'static str] = &["name", "email"];
//!     const HIDDEN: &'static [&'static str] = &["email"];
//! }
//!
//! let db = SqliteDatabase::in_memory();
//! db.execute(
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT, role TEXT)",
//!     &Bindings::new(),
//! ).unwrap();
//!
//! let data: Attributes = json!({"name": "Ana", "email": "ana@example.com", "role": "admin"})
//!     .as_object().unwrap().clone();
//! let user = User::query(&db).create(data).unwrap().unwrap();
//!
//! assert_eq!(user.get("role"), Some(&json!(null)));
//! assert_eq!(user.to_array().get("email"), None);
//! ```

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::database::{Bindings, Database, DatabaseError};

pub mod ident;
mod query;
#[cfg(test)]
pub(crate) mod testing;

pub use ident::{Direction, JoinKind, Operator};
pub use query::{Page, PageMeta, Query};

/// Column name → value.
pub type Attributes = Map<String, Value>;

/// Placeholder used for the key in `UPDATE`/`DELETE` statements. It is kept
/// apart from the `:<column>` placeholders so a `SET id = :id` cannot clash
/// with it.
const KEY_PLACEHOLDER: &str = ":__pk";

/// A name or keyword refused before it could reach SQL text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid column: {0}")]
    InvalidColumn(String),

    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    #[error("invalid join type: {0}")]
    InvalidJoinType(String),

    #[error("invalid sort direction: {0}")]
    InvalidDirection(String),
}

/// Errors from running a model operation.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("aggregate query returned no `{0}` column")]
    MissingAggregate(&'static str),
}

/// Static description of a table.
///
/// Every item has a default; an empty `impl Schema for Post {}` maps the
/// `posts` table with primary key `id`, selects `*`, and accepts every
/// column on mass assignment.
pub trait Schema: 'static {
    /// Explicit table name. Defaults to the type name, lowercased, plus `s`.
    const TABLE: Option<&'static str> = None;

    const PRIMARY_KEY: &'static str = "id";

    /// Columns selected when the query does not call `select`.
    const COLUMNS: &'static [&'static str] = &["*"];

    /// Columns accepted by `create`/`update`. Empty means "all of them".
    const FILLABLE: &'static [&'static str] = &[];

    /// Columns left out of [`Entity::to_array`] and serialization.
    const HIDDEN: &'static [&'static str] = &[];

    fn table() -> String {
        match Self::TABLE {
            Some(table) => table.to_owned(),
            None => default_table_name(type_name::<Self>()),
        }
    }

    /// Starts a fresh query against `db`.
    fn query(db: &dyn Database) -> Query<'_, Self>
    where
        Self: Sized,
    {
        Query::new(db)
    }
}

// `app::models::BlogPost` → `blogposts`
fn default_table_name(type_path: &str) -> String {
    let without_generics = type_path.split('<').next().unwrap_or(type_path);
    let short = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);
    format!("{}s", short.to_lowercase())
}

fn validated_table<S: Schema>() -> Result<String, QueryError> {
    let table = S::table();
    ident::table(&table)?;
    Ok(table)
}

/// A row of `S`'s table.
pub struct Entity<S> {
    attributes: Attributes,
    schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Entity<S> {
    pub fn new() -> Self {
        Self {
            attributes: Attributes::new(),
            schema: PhantomData,
        }
    }

    /// Wraps a row exactly as the database returned it. The fillable
    /// whitelist only applies to mass assignment, not to hydration.
    pub fn from_row(row: Attributes) -> Self {
        Self {
            attributes: row,
            schema: PhantomData,
        }
    }

    /// Mass-assigns `data`.
    ///
    /// Without a fillable whitelist the attribute set is replaced by `data`;
    /// with one, only whitelisted keys are copied in.
    #[must_use]
    pub fn fill(mut self, data: Attributes) -> Self {
        if S::FILLABLE.is_empty() {
            self.attributes = data;
        } else {
            for (key, value) in data {
                if S::FILLABLE.contains(&key.as_str()) {
                    self.attributes.insert(key, value);
                }
            }
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(column.into(), value.into());
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn into_attributes(self) -> Attributes {
        self.attributes
    }

    /// The primary-key value, unless it is missing or null.
    pub fn id(&self) -> Option<&Value> {
        self.attributes
            .get(S::PRIMARY_KEY)
            .filter(|value| !value.is_null())
    }

    /// The attributes without the hidden columns.
    pub fn to_array(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !S::HIDDEN.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Updates this entity's row from `data`.
    ///
    /// Returns `false` without touching the database when the entity has no
    /// primary key or nothing in `data` is fillable. On success the written
    /// values are merged into this entity as well.
    pub fn update(&mut self, db: &dyn Database, data: Attributes) -> Result<bool, ModelError> {
        let Some(id) = self.id().cloned() else {
            return Ok(false);
        };
        let changes = Entity::<S>::new().fill(data).into_attributes();
        let updated = update_row::<S>(db, &id, &changes)?;
        if updated {
            self.attributes.extend(changes);
        }
        Ok(updated)
    }

    /// Deletes this entity's row; `false` if it has no primary key.
    pub fn delete(&self, db: &dyn Database) -> Result<bool, ModelError> {
        match self.id() {
            Some(id) => delete_row::<S>(db, id),
            None => Ok(false),
        }
    }
}

impl<S: Schema> Default for Entity<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for Entity<S> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            schema: PhantomData,
        }
    }
}

impl<S> PartialEq for Entity<S> {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes
    }
}

impl<S> fmt::Debug for Entity<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("schema", &type_name::<S>())
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl<S: Schema> Serialize for Entity<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        self.to_array().serialize(serializer)
    }
}

/// `INSERT`s `attributes` and returns the generated row id.
pub(crate) fn insert_row<S: Schema>(
    db: &dyn Database,
    attributes: &Attributes,
) -> Result<i64, ModelError> {
    let table = validated_table::<S>()?;
    let mut columns = Vec::with_capacity(attributes.len());
    let mut placeholders = Vec::with_capacity(attributes.len());
    let mut bindings = Bindings::new();

    for (column, value) in attributes {
        ident::attribute(column)?;
        let placeholder = format!(":{column}");
        columns.push(column.as_str());
        bindings.bind(placeholder.clone(), value.clone());
        placeholders.push(placeholder);
    }

    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    debug!(%sql, "insert");
    db.execute(&sql, &bindings)?;
    Ok(db.last_insert_id()?)
}

/// `UPDATE`s the row keyed by `id`; `false` when there is nothing to write.
pub(crate) fn update_row<S: Schema>(
    db: &dyn Database,
    id: &Value,
    attributes: &Attributes,
) -> Result<bool, ModelError> {
    if attributes.is_empty() {
        return Ok(false);
    }
    let table = validated_table::<S>()?;
    let key = ident::attribute(S::PRIMARY_KEY)?;

    let mut assignments = Vec::with_capacity(attributes.len());
    let mut bindings = Bindings::new();
    for (column, value) in attributes {
        ident::attribute(column)?;
        assignments.push(format!("{column} = :{column}"));
        bindings.bind(format!(":{column}"), value.clone());
    }
    bindings.bind(KEY_PLACEHOLDER, id.clone());

    let sql = format!(
        "UPDATE {table} SET {} WHERE {key} = {KEY_PLACEHOLDER}",
        assignments.join(", ")
    );
    debug!(%sql, "update");
    db.execute(&sql, &bindings)?;
    Ok(true)
}

pub(crate) fn delete_row<S: Schema>(db: &dyn Database, id: &Value) -> Result<bool, ModelError> {
    let table = validated_table::<S>()?;
    let key = ident::attribute(S::PRIMARY_KEY)?;
    let mut bindings = Bindings::new();
    bindings.bind(KEY_PLACEHOLDER, id.clone());

    let sql = format!("DELETE FROM {table} WHERE {key} = {KEY_PLACEHOLDER}");
    debug!(%sql, "delete");
    db.execute(&sql, &bindings)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingDatabase, attrs};
    use super::*;
    use serde_json::json;

    struct Post;
    impl Schema for Post {}

    struct Person;
    impl Schema for Person {
        const TABLE: Option<&'static str> = Some("people");
        const PRIMARY_KEY: &'static str = "person_id";
        const FILLABLE: &'static [&'static str] = &["name"];
        const HIDDEN: &'static [&'static str] = &["password"];
    }

    struct Broken;
    impl Schema for Broken {
        const TABLE: Option<&'static str> = Some("users; DROP TABLE users");
    }

    #[test]
    fn table_name_defaults_from_type_name() {
        assert_eq!(Post::table(), "posts");
        assert_eq!(Person::table(), "people");
        assert_eq!(default_table_name("app::models::BlogPost"), "blogposts");
        assert_eq!(default_table_name("Wrapper<app::Thing>"), "wrappers");
    }

    #[test]
    fn fill_without_whitelist_takes_everything() {
        let post = Entity::<Post>::new().fill(attrs(json!({"title": "a", "body": "b"})));
        assert_eq!(post.attributes().len(), 2);
    }

    #[test]
    fn fill_with_whitelist_drops_unknown_keys() {
        let person = Entity::<Person>::new()
            .fill(attrs(json!({"name": "Ana", "admin": true, "person_id": 9})));
        assert_eq!(person.attributes(), &attrs(json!({"name": "Ana"})));
    }

    #[test]
    fn hidden_columns_only_vanish_on_output() {
        let person = Entity::<Person>::from_row(attrs(
            json!({"person_id": 1, "name": "Ana", "password": "x"}),
        ));
        assert_eq!(person.get("password"), Some(&json!("x")));
        assert!(!person.to_array().contains_key("password"));
        assert_eq!(
            serde_json::to_value(&person).unwrap(),
            json!({"person_id": 1, "name": "Ana"})
        );
    }

    #[test]
    fn id_ignores_null_keys() {
        let mut person = Entity::<Person>::from_row(attrs(json!({"person_id": null})));
        assert_eq!(person.id(), None);
        person.set("person_id", 4);
        assert_eq!(person.id(), Some(&json!(4)));
    }

    #[test]
    fn entity_update_uses_its_own_key() {
        let db = RecordingDatabase::new();
        let mut person = Entity::<Person>::from_row(attrs(json!({"person_id": 7, "name": "Ana"})));
        let updated = person
            .update(&db, attrs(json!({"name": "Bia", "admin": true})))
            .unwrap();

        assert!(updated);
        assert_eq!(person.get("name"), Some(&json!("Bia")));
        let (sql, bindings) = db.last_statement().unwrap();
        assert_eq!(sql, "UPDATE people SET name = :name WHERE person_id = :__pk");
        assert_eq!(bindings.get(":name"), Some(&json!("Bia")));
        assert_eq!(bindings.get(":__pk"), Some(&json!(7)));
    }

    #[test]
    fn update_with_nothing_fillable_issues_no_sql() {
        let db = RecordingDatabase::new();
        let mut person = Entity::<Person>::from_row(attrs(json!({"person_id": 7})));
        assert!(!person.update(&db, attrs(json!({"admin": true}))).unwrap());
        assert!(db.statements().is_empty());
    }

    #[test]
    fn keyless_entities_are_not_written() {
        let db = RecordingDatabase::new();
        let mut person = Entity::<Person>::new().fill(attrs(json!({"name": "Ana"})));
        assert!(!person.update(&db, attrs(json!({"name": "Bia"}))).unwrap());
        assert!(!person.delete(&db).unwrap());
        assert!(db.statements().is_empty());
    }

    #[test]
    fn entity_delete_binds_its_key() {
        let db = RecordingDatabase::new();
        let post = Entity::<Post>::from_row(attrs(json!({"id": 3})));
        assert!(post.delete(&db).unwrap());
        let (sql, bindings) = db.last_statement().unwrap();
        assert_eq!(sql, "DELETE FROM posts WHERE id = :__pk");
        assert_eq!(bindings.get(":__pk"), Some(&json!(3)));
    }

    #[test]
    fn attribute_names_are_validated_before_insert() {
        let db = RecordingDatabase::new();
        let err = insert_row::<Post>(&db, &attrs(json!({"title) VALUES (1); --": 1}))).unwrap_err();
        assert!(matches!(err, ModelError::Query(QueryError::InvalidColumn(_))));
        assert!(db.statements().is_empty());
    }

    #[test]
    fn columns_cannot_shadow_the_key_binding() {
        let db = RecordingDatabase::new();
        let err = update_row::<Post>(&db, &json!(5), &attrs(json!({"__pk": "payload"})))
            .unwrap_err();
        assert!(matches!(err, ModelError::Query(QueryError::InvalidColumn(ref c)) if c == "__pk"));

        let err = insert_row::<Post>(&db, &attrs(json!({"title": "a", "__pk": 1}))).unwrap_err();
        assert!(matches!(err, ModelError::Query(QueryError::InvalidColumn(_))));
        assert!(db.statements().is_empty());
    }

    #[test]
    fn unsafe_table_names_are_refused() {
        let db = RecordingDatabase::new();
        let err = delete_row::<Broken>(&db, &json!(1)).unwrap_err();
        assert!(matches!(err, ModelError::Query(QueryError::InvalidTable(_))));
        assert!(db.statements().is_empty());
    }
}
