// --------------------------------------------------
// Record store seam.
//
// Handlers only talk to `dyn RecordStore`; the hosted
// PostgREST client and the in-memory backend both sit
// behind it and share the Query vocabulary below.
// --------------------------------------------------

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Tasks,
    Subtasks,
    Categories,
    Profiles,
    PomodoroSessions,
    ActivityLog,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Tasks,
        Table::Subtasks,
        Table::Categories,
        Table::Profiles,
        Table::PomodoroSessions,
        Table::ActivityLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Subtasks => "subtasks",
            Table::Categories => "categories",
            Table::Profiles => "profiles",
            Table::PomodoroSessions => "pomodoro_sessions",
            Table::ActivityLog => "activity_log",
        }
    }
}

/// Row predicate. Column names are fixed at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    Neq(&'static str, Value),
    Lt(&'static str, Value),
    Gte(&'static str, Value),
    IsNull(&'static str),
    NotNull(&'static str),
    /// Array column holds every listed item.
    Contains(&'static str, Vec<String>),
    /// Case-insensitive substring match on any of the columns.
    Search(Vec<&'static str>, String),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `row[foreign_key]` points at the embedded row's id.
    Parent { foreign_key: &'static str },
    /// Embedded rows point back at `row.id` through `foreign_key`.
    Children { foreign_key: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: &'static str,
    pub table: Table,
    pub columns: &'static str,
    pub relation: Relation,
}

impl Embed {
    pub fn parent(alias: &'static str, table: Table, foreign_key: &'static str) -> Self {
        Self { alias, table, columns: "*", relation: Relation::Parent { foreign_key } }
    }

    pub fn children(alias: &'static str, table: Table, foreign_key: &'static str) -> Self {
        Self { alias, table, columns: "*", relation: Relation::Children { foreign_key } }
    }

    pub fn columns(mut self, columns: &'static str) -> Self {
        self.columns = columns;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub columns: &'static str,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: "*",
            embeds: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn columns(mut self, columns: &'static str) -> Self {
        self.columns = columns;
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(column, value.into()))
    }

    pub fn neq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Neq(column, value.into()))
    }

    pub fn lt(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(column, value.into()))
    }

    pub fn gte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(column, value.into()))
    }

    pub fn not_null(self, column: &'static str) -> Self {
        self.filter(Filter::NotNull(column))
    }

    pub fn contains(self, column: &'static str, items: Vec<String>) -> Self {
        self.filter(Filter::Contains(column, items))
    }

    pub fn search(self, columns: Vec<&'static str>, needle: impl Into<String>) -> Self {
        self.filter(Filter::Search(columns, needle.into()))
    }

    pub fn any_of(self, alternatives: Vec<Filter>) -> Self {
        self.filter(Filter::Or(alternatives))
    }

    pub fn order(mut self, column: &'static str, ascending: bool) -> Self {
        self.order.push(Order { column, ascending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// First matching row, if any.
    async fn select_one(&self, query: &Query) -> Result<Option<Value>, StoreError> {
        let query = query.clone().limit(1);
        Ok(self.select(&query).await?.into_iter().next())
    }

    /// Inserts one row and returns it as stored.
    async fn insert(&self, table: Table, row: Map<String, Value>) -> Result<Value, StoreError>;

    /// Applies `patch` to every matching row and returns the updated rows,
    /// shaped by the query's columns and embeds.
    async fn update(&self, query: &Query, patch: Map<String, Value>) -> Result<Vec<Value>, StoreError>;

    async fn delete(&self, query: &Query) -> Result<usize, StoreError>;

    /// Server-side function call (statistics aggregation).
    async fn call(&self, function: &str, args: Value) -> Result<Value, StoreError>;
}

pub fn decode<T: DeserializeOwned>(row: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(row)?)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(decode).collect()
}

/// Serializes an input struct into an insertable row.
pub fn to_row<T: Serialize>(value: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Decode(serde::ser::Error::custom(format!(
            "expected an object row, got {other}"
        )))),
    }
}
