// --------------------------------------------------
// Handles API endpoints related to tasks.
//
// Responsibilities:
// - List (with filters) / read / create / update / delete tasks
// - Toggle completion (pending <-> completed), keeping
//   completed_at and tempo_real in step with status
// - Reorder, today and overdue views
// --------------------------------------------------

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Local, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::logic::{self, CompletionChange};
use crate::models::{ApiResponse, Attachment, Priority, RecurrencePattern, Task, TaskStatus};
use crate::store::{decode, decode_all, to_row, Embed, Filter, Query, Table};
use crate::validation::{
    empty_as_none, parse_id, QueryParams, Schema, Validate, Validated, TASK_CREATE, TASK_REORDER, TASK_UPDATE,
};

// Tasks are always returned with their category and subtasks.
fn with_relations(query: Query) -> Query {
    query
        .embed(Embed::parent("category", Table::Categories, "category_id"))
        .embed(Embed::children("subtasks", Table::Subtasks, "task_id"))
}

fn owned(id: Uuid, user: &AuthUser) -> Query {
    Query::from(Table::Tasks)
        .eq("id", id.to_string())
        .eq("user_id", user.id.to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct TasksQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
    pub tags: Option<String>, // comma separated, all must match
}

// -----------------------------
// GET /api/tasks
// Lists the caller's tasks by position, optionally filtered
// -----------------------------
pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(q): QueryParams<TasksQuery>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let mut query = with_relations(Query::from(Table::Tasks))
        .eq("user_id", user.id.to_string())
        .order("position", true);

    if let Some(status) = q.status {
        query = query.eq("status", status.as_str());
    }
    if let Some(priority) = q.priority {
        query = query.eq("priority", priority.as_str());
    }
    if let Some(category_id) = q.category_id {
        query = query.eq("category_id", category_id.to_string());
    }
    if let Some(needle) = q.search.filter(|s| !s.trim().is_empty()) {
        query = query.search(vec!["title", "description"], needle.trim());
    }
    if let Some(tags) = q.tags {
        let tags: Vec<String> = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if !tags.is_empty() {
            query = query.contains("tags", tags);
        }
    }

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load tasks"))?;
    let tasks = decode_all(rows).map_err(ApiError::upstream("Failed to load tasks"))?;
    Ok(Json(ApiResponse::ok(tasks)))
}

// -----------------------------
// GET /api/tasks/:id
// -----------------------------
pub async fn get_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let id = parse_id(&id, "id")?;

    let row = state
        .store
        .select_one(&with_relations(owned(id, &user)))
        .await
        .map_err(ApiError::upstream("Failed to load task"))?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    let task = decode(row).map_err(ApiError::upstream("Failed to load task"))?;
    Ok(Json(ApiResponse::ok(task)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub priority: Priority,
    pub start_date: Option<DateTime<Utc>>,
    pub reminder_date: Option<DateTime<Utc>>,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub recurrence_interval: Option<i64>,
    pub estimated_time: Option<i64>,
    pub tags: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl Validate for CreateTaskInput {
    fn schema() -> &'static Schema {
        &TASK_CREATE
    }
}

// -----------------------------
// POST /api/tasks
// Creates a task at the end of the caller's list
// -----------------------------
pub async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    Validated(mut input): Validated<CreateTaskInput>,
) -> Result<impl IntoResponse, ApiError> {
    let last = state
        .store
        .select_one(
            &Query::from(Table::Tasks)
                .columns("position")
                .eq("user_id", user.id.to_string())
                .order("position", false),
        )
        .await
        .map_err(ApiError::upstream("Failed to create task"))?;
    let position = logic::next_position(last.and_then(|row| row.get("position").and_then(Value::as_i64)));

    input.description = input.description.filter(|d| !d.is_empty());

    let mut row = to_row(&input).map_err(ApiError::upstream("Failed to create task"))?;
    row.insert("user_id".into(), Value::String(user.id.to_string()));
    row.insert("status".into(), Value::from(TaskStatus::Pending.as_str()));
    row.insert("position".into(), Value::from(position));

    let created = state
        .store
        .insert(Table::Tasks, row)
        .await
        .map_err(ApiError::upstream("Failed to create task"))?;
    let task: Task = decode(created).map_err(ApiError::upstream("Failed to create task"))?;

    tracing::info!(task_id = %task.id, position, "task created");
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(task, "Task created successfully!"))))
}

/// Partial task update, already checked against the update schema.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct TaskPatch(pub Map<String, Value>);

impl Validate for TaskPatch {
    fn schema() -> &'static Schema {
        &TASK_UPDATE
    }
}

impl TaskPatch {
    fn status(&self) -> Option<TaskStatus> {
        self.0
            .get("status")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// Stored fields the lifecycle rules depend on.
#[derive(Debug, Deserialize)]
struct Lifecycle {
    status: TaskStatus,
    created_at: Option<String>,
}

async fn load_lifecycle(state: &AppState, id: Uuid, user: &AuthUser) -> Result<Lifecycle, ApiError> {
    let row = state
        .store
        .select_one(&owned(id, user).columns("id,status,created_at"))
        .await
        .map_err(ApiError::upstream("Failed to load task"))?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    decode(row).map_err(ApiError::upstream("Failed to load task"))
}

async fn apply_patch(
    state: &AppState,
    id: Uuid,
    user: &AuthUser,
    patch: Map<String, Value>,
) -> Result<Task, ApiError> {
    let row = state
        .store
        .update(&with_relations(owned(id, user)), patch)
        .await
        .map_err(ApiError::upstream("Failed to update task"))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Task"))?;
    decode(row).map_err(ApiError::upstream("Failed to update task"))
}

// -----------------------------
// PUT /api/tasks/:id
// Partial update; status changes drive completed_at / tempo_real
// -----------------------------
pub async fn update_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Validated(patch): Validated<TaskPatch>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let id = parse_id(&id, "id")?;
    let current = load_lifecycle(&state, id, &user).await?;

    let change = CompletionChange::from_transition(
        current.status,
        patch.status(),
        current.created_at.as_deref(),
        Utc::now(),
    );
    let mut fields = patch.0;
    change.apply(&mut fields);

    let task = apply_patch(&state, id, &user, fields).await?;
    Ok(Json(ApiResponse::with_message(task, "Task updated successfully!")))
}

// -----------------------------
// PATCH /api/tasks/:id/toggle
// Flips pending <-> completed
// -----------------------------
pub async fn toggle_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let id = parse_id(&id, "id")?;
    let current = load_lifecycle(&state, id, &user).await?;

    let next = logic::toggled_status(current.status);
    let mut fields = Map::new();
    fields.insert("status".into(), Value::from(next.as_str()));
    CompletionChange::from_transition(current.status, Some(next), current.created_at.as_deref(), Utc::now())
        .apply(&mut fields);

    let task = apply_patch(&state, id, &user, fields).await?;
    let label = match next {
        TaskStatus::Completed => "completed",
        _ => "pending",
    };
    Ok(Json(ApiResponse::with_message(task, format!("Task marked as {label}!"))))
}

// -----------------------------
// DELETE /api/tasks/:id
// Removes a task; subtasks go with it
// -----------------------------
pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let id = parse_id(&id, "id")?;

    let removed = state
        .store
        .delete(&owned(id, &user))
        .await
        .map_err(ApiError::upstream("Failed to delete task"))?;

    tracing::info!(task_id = %id, removed, "task deleted");
    Ok(Json(ApiResponse::message("Task deleted successfully!")))
}

#[derive(Debug, Deserialize)]
pub struct ReorderInput {
    #[serde(rename = "taskIds")]
    pub task_ids: Vec<Uuid>,
}

impl Validate for ReorderInput {
    fn schema() -> &'static Schema {
        &TASK_REORDER
    }
}

// -----------------------------
// PUT /api/tasks/reorder
// Position of each listed task becomes its index in the list
// -----------------------------
pub async fn reorder_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    Validated(input): Validated<ReorderInput>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let store = &state.store;

    let updates = input.task_ids.iter().enumerate().map(|(position, id)| {
        let query = owned(*id, &user).columns("id");
        let mut patch = Map::new();
        patch.insert("position".into(), Value::from(position as i64));
        async move { store.update(&query, patch).await }
    });
    try_join_all(updates).await.map_err(ApiError::upstream("Failed to reorder tasks"))?;

    Ok(Json(ApiResponse::message("Tasks reordered successfully!")))
}

// -----------------------------
// GET /api/tasks/overdue
// Open tasks whose estimated end has passed, longest overdue first
// -----------------------------
pub async fn overdue_tasks(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let query = Query::from(Table::Tasks)
        .embed(Embed::parent("category", Table::Categories, "category_id"))
        .eq("user_id", user.id.to_string())
        .neq("status", TaskStatus::Completed.as_str())
        .not_null("estimated_time");

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load overdue tasks"))?;
    let tasks = decode_all(rows).map_err(ApiError::upstream("Failed to load overdue tasks"))?;
    Ok(Json(ApiResponse::ok(logic::overdue_tasks(tasks, Utc::now()))))
}

// -----------------------------
// GET /api/tasks/today
// Created or starting during the local day, highest priority first
// -----------------------------
pub async fn today_tasks(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let (start, end) = logic::day_window(&Local::now());
    let within = |column: &'static str| {
        Filter::And(vec![
            Filter::Gte(column, Value::String(logic::iso(start))),
            Filter::Lt(column, Value::String(logic::iso(end))),
        ])
    };

    let query = with_relations(Query::from(Table::Tasks))
        .eq("user_id", user.id.to_string())
        .any_of(vec![within("created_at"), within("start_date")])
        .order("position", true);

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load today's tasks"))?;
    let mut tasks: Vec<Task> = decode_all(rows).map_err(ApiError::upstream("Failed to load today's tasks"))?;
    logic::sort_by_priority_desc(&mut tasks);
    Ok(Json(ApiResponse::ok(tasks)))
}
