// --------------------------------------------------
// Process-local record store and identity provider.
//
// Mirrors the hosted backend closely enough to run the
// whole API without network access: same filter, order
// and embed semantics, ids and timestamps assigned on
// insert, cascade deletes for subtasks and accounts.
// --------------------------------------------------

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{Embed, Filter, Query, RecordStore, Relation, Table};
use crate::error::StoreError;
use crate::identity::{Identity, IdentityProvider};
use crate::logic::iso;

type Row = Map<String, Value>;

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    tokens: RwLock<HashMap<String, Identity>>,
    functions: RwLock<HashMap<String, Value>>,
    operations: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account the way the hosted provider provisions one:
    /// the token becomes valid and a default profile row is created.
    pub fn register_user(&self, token: &str, email: &str) -> Identity {
        let identity = Identity { id: Uuid::new_v4(), email: Some(email.to_string()) };
        self.tokens.write().insert(token.to_string(), identity.clone());

        let now = iso(Utc::now());
        let profile = json!({
            "id": identity.id.to_string(),
            "email": email,
            "full_name": null,
            "avatar_url": null,
            "theme_preference": "auto",
            "custom_color": "#3B82F6",
            "notifications_enabled": true,
            "created_at": now,
            "updated_at": now,
        });
        if let Value::Object(row) = profile {
            self.tables.write().entry(Table::Profiles).or_default().push(row);
        }
        identity
    }

    /// Result returned by `call(function, ..)`; unregistered functions fail
    /// like a missing database function would.
    pub fn register_function(&self, name: &str, result: Value) {
        self.functions.write().insert(name.to_string(), result);
    }

    /// Places a row verbatim, bypassing id/timestamp assignment.
    pub fn seed(&self, table: Table, row: Value) {
        if let Value::Object(row) = row {
            self.tables.write().entry(table).or_default().push(row);
        }
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .read()
            .get(&table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Number of record store calls served so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(AtomicOrdering::SeqCst)
    }

    fn touch(&self) {
        self.operations.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn shape(&self, tables: &HashMap<Table, Vec<Row>>, query: &Query, row: &Row) -> Value {
        let mut shaped = project(row, query.columns);
        for embed in &query.embeds {
            shaped.insert(embed.alias.to_string(), resolve_embed(tables, embed, row));
        }
        Value::Object(shaped)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.touch();
        let tables = self.tables.read();
        let mut rows: Vec<&Row> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| matches_all(&query.filters, r)).collect())
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            query.order.iter().fold(Ordering::Equal, |acc, o| {
                acc.then_with(|| order_values(a.get(o.column), b.get(o.column), o.ascending))
            })
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| self.shape(&tables, query, row))
            .collect())
    }

    async fn insert(&self, table: Table, mut row: Row) -> Result<Value, StoreError> {
        self.touch();
        let now = iso(Utc::now());
        row.entry("id").or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at").or_insert_with(|| Value::String(now.clone()));
        row.entry("updated_at").or_insert_with(|| Value::String(now));

        self.tables.write().entry(table).or_default().push(row.clone());
        Ok(Value::Object(row))
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Value>, StoreError> {
        self.touch();
        let now = iso(Utc::now());
        let mut tables = self.tables.write();

        let mut touched = Vec::new();
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| matches_all(&query.filters, r)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                row.insert("updated_at".to_string(), Value::String(now.clone()));
                touched.push(row.clone());
            }
        }

        Ok(touched.iter().map(|row| self.shape(&tables, query, row)).collect())
    }

    async fn delete(&self, query: &Query) -> Result<usize, StoreError> {
        self.touch();
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(&query.table) else {
            return Ok(0);
        };

        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|r| matches_all(&query.filters, r));
        *rows = kept;

        if query.table == Table::Tasks {
            let ids: Vec<&Value> = removed.iter().filter_map(|r| r.get("id")).collect();
            if let Some(subtasks) = tables.get_mut(&Table::Subtasks) {
                subtasks.retain(|s| s.get("task_id").is_none_or(|t| !ids.contains(&t)));
            }
        }
        Ok(removed.len())
    }

    async fn call(&self, function: &str, _args: Value) -> Result<Value, StoreError> {
        self.touch();
        self.functions.read().get(function).cloned().ok_or_else(|| StoreError::Api {
            status: 404,
            message: format!("Could not find the function public.{function}"),
        })
    }
}

#[async_trait]
impl IdentityProvider for InMemoryStore {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.tokens.read().get(token).cloned())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        self.tokens.write().retain(|_, identity| identity.id != id);

        let owner = Value::String(id.to_string());
        let mut tables = self.tables.write();
        let removed_tasks: Vec<Value> = tables
            .get(&Table::Tasks)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get("user_id") == Some(&owner))
                    .filter_map(|r| r.get("id").cloned())
                    .collect()
            })
            .unwrap_or_default();

        for table in Table::ALL {
            let Some(rows) = tables.get_mut(&table) else { continue };
            match table {
                Table::Profiles => rows.retain(|r| r.get("id") != Some(&owner)),
                Table::Subtasks => {
                    rows.retain(|r| r.get("task_id").is_none_or(|t| !removed_tasks.contains(t)))
                }
                _ => rows.retain(|r| r.get("user_id") != Some(&owner)),
            }
        }
        Ok(())
    }
}

// -----------------------------
// Row evaluation
// -----------------------------

fn project(row: &Row, columns: &str) -> Row {
    if columns.trim() == "*" {
        return row.clone();
    }
    columns
        .split(',')
        .map(str::trim)
        .filter_map(|c| row.get(c).map(|v| (c.to_string(), v.clone())))
        .collect()
}

fn resolve_embed(tables: &HashMap<Table, Vec<Row>>, embed: &Embed, row: &Row) -> Value {
    let related = tables.get(&embed.table).map(Vec::as_slice).unwrap_or_default();
    match embed.relation {
        Relation::Parent { foreign_key } => {
            let Some(key) = row.get(foreign_key).filter(|v| !v.is_null()) else {
                return Value::Null;
            };
            related
                .iter()
                .find(|r| r.get("id") == Some(key))
                .map(|r| Value::Object(project(r, embed.columns)))
                .unwrap_or(Value::Null)
        }
        Relation::Children { foreign_key } => {
            let id = row.get("id");
            Value::Array(
                related
                    .iter()
                    .filter(|r| id.is_some() && r.get(foreign_key) == id)
                    .map(|r| Value::Object(project(r, embed.columns)))
                    .collect(),
            )
        }
    }
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| matches(f, row))
}

fn matches(filter: &Filter, row: &Row) -> bool {
    let field = |column: &str| row.get(column).filter(|v| !v.is_null());

    match filter {
        Filter::Eq(column, Value::Null) | Filter::IsNull(column) => field(column).is_none(),
        Filter::Eq(column, expected) => {
            field(column).is_some_and(|v| compare(v, expected) == Some(Ordering::Equal))
        }
        Filter::Neq(column, expected) => {
            field(column).is_some_and(|v| compare(v, expected) != Some(Ordering::Equal))
        }
        Filter::Lt(column, bound) => field(column).is_some_and(|v| compare(v, bound) == Some(Ordering::Less)),
        Filter::Gte(column, bound) => field(column).is_some_and(|v| {
            matches!(compare(v, bound), Some(Ordering::Greater | Ordering::Equal))
        }),
        Filter::NotNull(column) => field(column).is_some(),
        Filter::Contains(column, items) => field(column)
            .and_then(Value::as_array)
            .is_some_and(|values| items.iter().all(|i| values.iter().any(|v| v.as_str() == Some(i.as_str())))),
        Filter::Search(columns, needle) => {
            let needle = needle.to_lowercase();
            columns.iter().any(|c| {
                field(c)
                    .and_then(Value::as_str)
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
            })
        }
        Filter::Or(items) => items.iter().any(|f| matches(f, row)),
        Filter::And(items) => matches_all(items, row),
    }
}

/// Numbers numerically, timestamps chronologically, other strings lexically.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        _ => None,
    }
}

// Nulls sort last ascending and first descending, as in Postgres.
fn order_values(a: Option<&Value>, b: Option<&Value>, ascending: bool) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let ordering = match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
    };
    if ascending { ordering } else { ordering.reverse() }
}
