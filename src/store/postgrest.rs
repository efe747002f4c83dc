// --------------------------------------------------
// Hosted datastore client (PostgREST dialect) and the
// matching auth API of the same provider.
//
// Responsibilities:
// - Render Query into PostgREST query parameters
// - CRUD + rpc over /rest/v1
// - Token verification and account removal over /auth/v1
// --------------------------------------------------

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Embed, Filter, Query, RecordStore, Table};
use crate::error::StoreError;
use crate::identity::{Identity, IdentityProvider};

pub struct SupabaseClient {
    http: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    // Service-role credentials: row filtering is done by the handlers.
    fn service(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| if body.is_empty() { status.to_string() } else { body });

    Err(StoreError::Api { status: status.as_u16(), message })
}

#[async_trait]
impl RecordStore for SupabaseClient {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let request = self
            .http
            .get(self.rest_url(query.table.as_str()))
            .query(&read_params(query));
        let response = ensure_success(self.service(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn insert(&self, table: Table, row: Map<String, Value>) -> Result<Value, StoreError> {
        let request = self
            .http
            .post(self.rest_url(table.as_str()))
            .query(&[("select", "*")])
            .header("Prefer", "return=representation")
            .json(&row);
        let response = ensure_success(self.service(request).send().await?).await?;
        let rows: Vec<Value> = response.json().await?;

        rows.into_iter().next().ok_or_else(|| StoreError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: format!("insert into {} returned no row", table.as_str()),
        })
    }

    async fn update(&self, query: &Query, patch: Map<String, Value>) -> Result<Vec<Value>, StoreError> {
        let request = self
            .http
            .patch(self.rest_url(query.table.as_str()))
            .query(&write_params(query))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = ensure_success(self.service(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, query: &Query) -> Result<usize, StoreError> {
        let request = self
            .http
            .delete(self.rest_url(query.table.as_str()))
            .query(&write_params(query))
            .header("Prefer", "return=representation");
        let response = ensure_success(self.service(request).send().await?).await?;
        let rows: Vec<Value> = response.json().await?;
        Ok(rows.len())
    }

    async fn call(&self, function: &str, args: Value) -> Result<Value, StoreError> {
        let request = self
            .http
            .post(self.rest_url(&format!("rpc/{function}")))
            .json(&args);
        let response = ensure_success(self.service(request).send().await?).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn verify(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        let response = self
            .http
            .get(self.auth_url("user"))
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .send()
            .await?;

        if is_rejection(response.status()) {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let request = self.http.delete(self.auth_url(&format!("admin/users/{id}")));
        ensure_success(self.service(request).send().await?).await?;
        Ok(())
    }
}

// Only these mean the token itself was refused; other failures are the provider's.
fn is_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

// -----------------------------
// Query rendering
// -----------------------------

fn select_param(query: &Query) -> String {
    std::iter::once(query.columns.to_string())
        .chain(query.embeds.iter().map(embed_clause))
        .collect::<Vec<_>>()
        .join(",")
}

fn embed_clause(embed: &Embed) -> String {
    let table = embed.table.as_str();
    if embed.alias == table {
        format!("{table}({})", embed.columns)
    } else {
        format!("{}:{table}({})", embed.alias, embed.columns)
    }
}

/// Parameters for PATCH/DELETE: projection and filters only.
pub fn write_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), select_param(query))];
    params.extend(query.filters.iter().map(top_level));
    params
}

/// Parameters for GET: filters plus ordering and range.
pub fn read_params(query: &Query) -> Vec<(String, String)> {
    let mut params = write_params(query);

    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

enum Rendered {
    /// `column`, `op.value`
    Leaf(&'static str, String),
    /// `or` / `and`, `(a,b,...)`
    Tree(&'static str, String),
}

fn render(filter: &Filter, nested: bool) -> Rendered {
    match filter {
        Filter::Or(items) => Rendered::Tree("or", group(items)),
        Filter::And(items) => Rendered::Tree("and", group(items)),
        Filter::Search(columns, needle) => Rendered::Tree("or", search_group(columns, needle)),
        Filter::Eq(column, Value::Null) | Filter::IsNull(column) => {
            Rendered::Leaf(*column, "is.null".to_string())
        }
        Filter::Eq(column, value) => Rendered::Leaf(*column, format!("eq.{}", literal(value, nested))),
        Filter::Neq(column, value) => Rendered::Leaf(*column, format!("neq.{}", literal(value, nested))),
        Filter::Lt(column, value) => Rendered::Leaf(*column, format!("lt.{}", literal(value, nested))),
        Filter::Gte(column, value) => Rendered::Leaf(*column, format!("gte.{}", literal(value, nested))),
        Filter::NotNull(column) => Rendered::Leaf(*column, "not.is.null".to_string()),
        Filter::Contains(column, items) => {
            let items = items.iter().map(|i| quote(i)).collect::<Vec<_>>().join(",");
            Rendered::Leaf(*column, format!("cs.{{{items}}}"))
        }
    }
}

fn top_level(filter: &Filter) -> (String, String) {
    match render(filter, false) {
        Rendered::Leaf(column, condition) => (column.to_string(), condition),
        Rendered::Tree(op, group) => (op.to_string(), group),
    }
}

fn nested(filter: &Filter) -> String {
    match render(filter, true) {
        Rendered::Leaf(column, condition) => format!("{column}.{condition}"),
        Rendered::Tree(op, group) => format!("{op}{group}"),
    }
}

fn group(items: &[Filter]) -> String {
    format!("({})", items.iter().map(nested).collect::<Vec<_>>().join(","))
}

fn search_group(columns: &[&'static str], needle: &str) -> String {
    let pattern = literal(&Value::String(format!("*{needle}*")), true);
    let parts = columns
        .iter()
        .map(|c| format!("{c}.ilike.{pattern}"))
        .collect::<Vec<_>>();
    format!("({})", parts.join(","))
}

fn literal(value: &Value, nested: bool) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    // Reserved characters inside or=(...) / and=(...) need quoting.
    if nested && raw.chars().any(|c| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | ' ')) {
        quote(&raw)
    } else {
        raw
    }
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Embed;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn renders_task_listing() {
        let query = Query::from(Table::Tasks)
            .embed(Embed::parent("category", Table::Categories, "category_id"))
            .embed(Embed::children("subtasks", Table::Subtasks, "task_id"))
            .eq("user_id", "u-1")
            .eq("status", "completed")
            .contains("tags", vec!["work".into(), "q1 plan".into()])
            .order("position", true);

        let params = read_params(&query);
        assert_eq!(param(&params, "select"), ["*,category:categories(*),subtasks(*)"]);
        assert_eq!(param(&params, "user_id"), ["eq.u-1"]);
        assert_eq!(param(&params, "status"), ["eq.completed"]);
        assert_eq!(param(&params, "tags"), [r#"cs.{"work","q1 plan"}"#]);
        assert_eq!(param(&params, "order"), ["position.asc"]);
        assert!(param(&params, "limit").is_empty());
    }

    #[test]
    fn renders_search_as_or_group() {
        let query = Query::from(Table::Tasks).search(vec!["title", "description"], "report");
        let params = read_params(&query);
        assert_eq!(param(&params, "or"), ["(title.ilike.*report*,description.ilike.*report*)"]);
    }

    #[test]
    fn quotes_reserved_characters_in_logic_trees() {
        let query = Query::from(Table::Tasks).any_of(vec![
            Filter::And(vec![
                Filter::Gte("created_at", "2025-03-01T03:00:00.000Z".into()),
                Filter::Lt("created_at", "2025-03-02T03:00:00.000Z".into()),
            ]),
            Filter::And(vec![
                Filter::Gte("start_date", "2025-03-01T03:00:00.000Z".into()),
                Filter::Lt("start_date", "2025-03-02T03:00:00.000Z".into()),
            ]),
        ]);

        let params = read_params(&query);
        assert_eq!(
            param(&params, "or"),
            [concat!(
                r#"(and(created_at.gte."2025-03-01T03:00:00.000Z",created_at.lt."2025-03-02T03:00:00.000Z"),"#,
                r#"and(start_date.gte."2025-03-01T03:00:00.000Z",start_date.lt."2025-03-02T03:00:00.000Z"))"#
            )]
        );
    }

    #[test]
    fn renders_null_checks_range_and_column_embeds() {
        let query = Query::from(Table::ActivityLog)
            .columns("id,action")
            .embed(Embed::parent("task", Table::Tasks, "task_id").columns("title"))
            .eq("task_id", Value::Null)
            .not_null("created_at")
            .order("created_at", false)
            .range(40, 20);

        let params = read_params(&query);
        assert_eq!(param(&params, "select"), ["id,action,task:tasks(title)"]);
        assert_eq!(param(&params, "task_id"), ["is.null"]);
        assert_eq!(param(&params, "created_at"), ["not.is.null"]);
        assert_eq!(param(&params, "order"), ["created_at.desc"]);
        assert_eq!(param(&params, "limit"), ["20"]);
        assert_eq!(param(&params, "offset"), ["40"]);
    }

    #[test]
    fn write_params_skip_ordering() {
        let query = Query::from(Table::Tasks).eq("id", "t-1").order("position", true).limit(1);
        let params = write_params(&query);
        assert!(param(&params, "order").is_empty());
        assert!(param(&params, "limit").is_empty());
        assert_eq!(param(&params, "id"), ["eq.t-1"]);
    }

    #[test]
    fn only_401_and_403_reject_a_token() {
        assert!(is_rejection(StatusCode::UNAUTHORIZED));
        assert!(is_rejection(StatusCode::FORBIDDEN));
        assert!(!is_rejection(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_rejection(StatusCode::BAD_REQUEST));
        assert!(!is_rejection(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn embed_alias_matching_table_is_not_repeated() {
        let embed = Embed::parent("categories", Table::Categories, "category_id").columns("name,color");
        assert_eq!(embed_clause(&embed), "categories(name,color)");
    }
}
