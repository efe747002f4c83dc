// --------------------------------------------------
// Subtask endpoints, nested under /api/tasks/:id/subtasks.
// Every call first checks that the parent task belongs
// to the caller.
// --------------------------------------------------

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::logic;
use crate::models::{ApiResponse, Subtask};
use crate::store::{decode, decode_all, Query, Table};
use crate::validation::{parse_id, Schema, Validate, Validated, SUBTASK_CREATE, SUBTASK_UPDATE};

async fn ensure_task(state: &AppState, task_id: Uuid, user: &AuthUser) -> Result<(), ApiError> {
    state
        .store
        .select_one(
            &Query::from(Table::Tasks)
                .columns("id")
                .eq("id", task_id.to_string())
                .eq("user_id", user.id.to_string()),
        )
        .await
        .map_err(ApiError::upstream("Failed to load task"))?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("Task"))
}

fn subtask(task_id: Uuid, id: Uuid) -> Query {
    Query::from(Table::Subtasks)
        .eq("id", id.to_string())
        .eq("task_id", task_id.to_string())
}

fn parse_ids(task_id: &str, id: &str) -> Result<(Uuid, Uuid), ApiError> {
    Ok((parse_id(task_id, "id")?, parse_id(id, "subtask_id")?))
}

// -----------------------------
// GET /api/tasks/:id/subtasks
// -----------------------------
pub async fn list_subtasks(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Subtask>>>, ApiError> {
    let task_id = parse_id(&task_id, "id")?;
    ensure_task(&state, task_id, &user).await?;

    let query = Query::from(Table::Subtasks)
        .eq("task_id", task_id.to_string())
        .order("position", true);
    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load subtasks"))?;
    let subtasks = decode_all(rows).map_err(ApiError::upstream("Failed to load subtasks"))?;
    Ok(Json(ApiResponse::ok(subtasks)))
}

// A client-sent `position` passes validation but the server assigns its own.
#[derive(Debug, Deserialize)]
pub struct CreateSubtaskInput {
    pub title: String,
}

impl Validate for CreateSubtaskInput {
    fn schema() -> &'static Schema {
        &SUBTASK_CREATE
    }
}

// -----------------------------
// POST /api/tasks/:id/subtasks
// Appends a subtask after the task's last one
// -----------------------------
pub async fn create_subtask(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Validated(input): Validated<CreateSubtaskInput>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = parse_id(&task_id, "id")?;
    ensure_task(&state, task_id, &user).await?;

    let last = state
        .store
        .select_one(
            &Query::from(Table::Subtasks)
                .columns("position")
                .eq("task_id", task_id.to_string())
                .order("position", false),
        )
        .await
        .map_err(ApiError::upstream("Failed to create subtask"))?;
    let position = logic::next_position(last.and_then(|row| row.get("position").and_then(Value::as_i64)));

    let mut row = Map::new();
    row.insert("task_id".into(), Value::String(task_id.to_string()));
    row.insert("title".into(), Value::String(input.title));
    row.insert("completed".into(), Value::Bool(false));
    row.insert("position".into(), Value::from(position));

    let created = state
        .store
        .insert(Table::Subtasks, row)
        .await
        .map_err(ApiError::upstream("Failed to create subtask"))?;
    let subtask: Subtask = decode(created).map_err(ApiError::upstream("Failed to create subtask"))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(subtask, "Subtask created successfully!"))))
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct SubtaskPatch(pub Map<String, Value>);

impl Validate for SubtaskPatch {
    fn schema() -> &'static Schema {
        &SUBTASK_UPDATE
    }
}

async fn apply_patch(
    state: &AppState,
    task_id: Uuid,
    id: Uuid,
    patch: Map<String, Value>,
) -> Result<Subtask, ApiError> {
    let row = state
        .store
        .update(&subtask(task_id, id), patch)
        .await
        .map_err(ApiError::upstream("Failed to update subtask"))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Subtask"))?;
    decode(row).map_err(ApiError::upstream("Failed to update subtask"))
}

// -----------------------------
// PUT /api/tasks/:id/subtasks/:subtask_id
// -----------------------------
pub async fn update_subtask(
    State(state): State<AppState>,
    user: AuthUser,
    Path((task_id, id)): Path<(String, String)>,
    Validated(patch): Validated<SubtaskPatch>,
) -> Result<Json<ApiResponse<Subtask>>, ApiError> {
    let (task_id, id) = parse_ids(&task_id, &id)?;
    ensure_task(&state, task_id, &user).await?;

    let subtask = apply_patch(&state, task_id, id, patch.0).await?;
    Ok(Json(ApiResponse::with_message(subtask, "Subtask updated successfully!")))
}

// -----------------------------
// PATCH /api/tasks/:id/subtasks/:subtask_id/toggle
// -----------------------------
pub async fn toggle_subtask(
    State(state): State<AppState>,
    user: AuthUser,
    Path((task_id, id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Subtask>>, ApiError> {
    let (task_id, id) = parse_ids(&task_id, &id)?;
    ensure_task(&state, task_id, &user).await?;

    let current = state
        .store
        .select_one(&subtask(task_id, id).columns("completed"))
        .await
        .map_err(ApiError::upstream("Failed to load subtask"))?
        .ok_or_else(|| ApiError::not_found("Subtask"))?;
    let completed = current.get("completed").and_then(Value::as_bool).unwrap_or(false);

    let mut patch = Map::new();
    patch.insert("completed".into(), Value::Bool(!completed));

    let subtask = apply_patch(&state, task_id, id, patch).await?;
    Ok(Json(ApiResponse::with_message(subtask, "Subtask updated successfully!")))
}

// -----------------------------
// DELETE /api/tasks/:id/subtasks/:subtask_id
// -----------------------------
pub async fn delete_subtask(
    State(state): State<AppState>,
    user: AuthUser,
    Path((task_id, id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let (task_id, id) = parse_ids(&task_id, &id)?;
    ensure_task(&state, task_id, &user).await?;

    state
        .store
        .delete(&subtask(task_id, id))
        .await
        .map_err(ApiError::upstream("Failed to delete subtask"))?;

    Ok(Json(ApiResponse::message("Subtask deleted successfully!")))
}
