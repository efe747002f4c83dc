// --------------------------------------------------
// Analytics, activity log and pomodoro endpoints.
//
// Aggregation is done by the folds in analytics.rs;
// handlers here only choose rows and columns.
// --------------------------------------------------

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::analytics::{
    self, CategoryShare, CompletionRow, Period, PriorityRow, PriorityShare, ProductivityDay,
    TaskStatistics, PRODUCTIVITY_DAYS,
};
use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::logic::iso;
use crate::models::{ActivityLog, ApiResponse, CategorizedTask, PomodoroSession, Task, TaskStatus};
use crate::store::{decode, decode_all, Embed, Query, Table};
use crate::validation::{empty_as_default, parse_id, QueryParams, Schema, Validate, Validated, POMODORO_CREATE};

const STATISTICS_FUNCTION: &str = "get_task_statistics";

fn task_title() -> Embed {
    Embed::parent("task", Table::Tasks, "task_id").columns("title")
}

#[derive(Debug, Default, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default, deserialize_with = "empty_as_default")]
    pub period: Period,
}

// -----------------------------
// GET /api/analytics/statistics?period=
// Store-side aggregation, recomputed here if that fails
// -----------------------------
pub async fn statistics(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(q): QueryParams<StatisticsQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let args = json!({ "user_uuid": user.id, "time_period": q.period.as_str() });

    match state.store.call(STATISTICS_FUNCTION, args).await {
        Ok(result) if !result.is_null() => return Ok(Json(ApiResponse::ok(result))),
        Ok(_) => tracing::warn!(period = q.period.as_str(), "statistics function returned nothing, computing locally"),
        Err(e) => tracing::warn!(error = %e, period = q.period.as_str(), "statistics function failed, computing locally"),
    }

    let now = Utc::now();
    let query = Query::from(Table::Tasks)
        .eq("user_id", user.id.to_string())
        .gte("created_at", iso(q.period.start(now)));

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load statistics"))?;
    let tasks: Vec<Task> = decode_all(rows).map_err(ApiError::upstream("Failed to load statistics"))?;

    let stats = TaskStatistics::from_tasks(&tasks, now);
    let stats = serde_json::to_value(stats).map_err(|e| ApiError::upstream("Failed to load statistics")(e.into()))?;
    Ok(Json(ApiResponse::ok(stats)))
}

// -----------------------------
// GET /api/analytics/productivity
// Completed tasks per day over the last 30 days
// -----------------------------
pub async fn productivity(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<ProductivityDay>>>, ApiError> {
    let since = Utc::now() - TimeDelta::days(PRODUCTIVITY_DAYS);
    let query = Query::from(Table::Tasks)
        .columns("completed_at,tempo_real")
        .eq("user_id", user.id.to_string())
        .eq("status", TaskStatus::Completed.as_str())
        .gte("completed_at", iso(since))
        .order("completed_at", true);

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load productivity"))?;
    let rows: Vec<CompletionRow> = decode_all(rows).map_err(ApiError::upstream("Failed to load productivity"))?;
    Ok(Json(ApiResponse::ok(analytics::productivity_by_day(&rows))))
}

// -----------------------------
// GET /api/analytics/categories
// -----------------------------
pub async fn category_distribution(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<CategoryShare>>>, ApiError> {
    let query = Query::from(Table::Tasks)
        .columns("category_id")
        .embed(Embed::parent("categories", Table::Categories, "category_id").columns("name,color"))
        .eq("user_id", user.id.to_string());

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load distribution"))?;
    let rows: Vec<CategorizedTask> = decode_all(rows).map_err(ApiError::upstream("Failed to load distribution"))?;
    Ok(Json(ApiResponse::ok(analytics::category_distribution(&rows))))
}

// -----------------------------
// GET /api/analytics/priorities
// -----------------------------
pub async fn priority_distribution(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<PriorityShare>>>, ApiError> {
    let query = Query::from(Table::Tasks)
        .columns("priority,status")
        .eq("user_id", user.id.to_string());

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load distribution"))?;
    let rows: Vec<PriorityRow> = decode_all(rows).map_err(ApiError::upstream("Failed to load distribution"))?;
    Ok(Json(ApiResponse::ok(analytics::priority_distribution(&rows))))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_activity_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_activity_limit() -> usize {
    50
}

// -----------------------------
// GET /api/analytics/activity?limit=&offset=
// Newest first
// -----------------------------
pub async fn activity(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(q): QueryParams<ActivityQuery>,
) -> Result<Json<ApiResponse<Vec<ActivityLog>>>, ApiError> {
    let query = Query::from(Table::ActivityLog)
        .embed(task_title())
        .eq("user_id", user.id.to_string())
        .order("created_at", false)
        .range(q.offset, q.limit);

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load activity log"))?;
    let entries = decode_all(rows).map_err(ApiError::upstream("Failed to load activity log"))?;
    Ok(Json(ApiResponse::ok(entries)))
}

#[derive(Debug, Deserialize)]
pub struct PomodoroQuery {
    #[serde(default = "default_pomodoro_limit")]
    pub limit: usize,
}

fn default_pomodoro_limit() -> usize {
    20
}

// -----------------------------
// GET /api/analytics/pomodoro?limit=
// -----------------------------
pub async fn list_pomodoro(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(q): QueryParams<PomodoroQuery>,
) -> Result<Json<ApiResponse<Vec<PomodoroSession>>>, ApiError> {
    let query = Query::from(Table::PomodoroSessions)
        .embed(task_title())
        .eq("user_id", user.id.to_string())
        .order("started_at", false)
        .limit(q.limit);

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load pomodoro sessions"))?;
    let sessions = decode_all(rows).map_err(ApiError::upstream("Failed to load pomodoro sessions"))?;
    Ok(Json(ApiResponse::ok(sessions)))
}

#[derive(Debug, Deserialize)]
pub struct CreatePomodoroInput {
    pub task_id: Option<Uuid>,
    pub duration: i64, // minutes, 1..=120
}

impl Validate for CreatePomodoroInput {
    fn schema() -> &'static Schema {
        &POMODORO_CREATE
    }
}

// -----------------------------
// POST /api/analytics/pomodoro
// Starts a session now
// -----------------------------
pub async fn create_pomodoro(
    State(state): State<AppState>,
    user: AuthUser,
    Validated(input): Validated<CreatePomodoroInput>,
) -> Result<impl IntoResponse, ApiError> {
    let mut row = Map::new();
    row.insert("user_id".into(), Value::String(user.id.to_string()));
    row.insert("task_id".into(), input.task_id.map_or(Value::Null, |id| Value::String(id.to_string())));
    row.insert("duration".into(), Value::from(input.duration));
    row.insert("completed".into(), Value::Bool(false));
    row.insert("started_at".into(), Value::String(iso(Utc::now())));

    let created = state
        .store
        .insert(Table::PomodoroSessions, row)
        .await
        .map_err(ApiError::upstream("Failed to start pomodoro session"))?;
    let session: PomodoroSession = decode(created).map_err(ApiError::upstream("Failed to start pomodoro session"))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(session, "Pomodoro session started!"))))
}

// -----------------------------
// PATCH /api/analytics/pomodoro/:id/complete
// -----------------------------
pub async fn complete_pomodoro(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PomodoroSession>>, ApiError> {
    let id = parse_id(&id, "id")?;

    let query = Query::from(Table::PomodoroSessions)
        .eq("id", id.to_string())
        .eq("user_id", user.id.to_string());
    let mut patch = Map::new();
    patch.insert("completed".into(), Value::Bool(true));
    patch.insert("completed_at".into(), Value::String(iso(Utc::now())));

    let row = state
        .store
        .update(&query, patch)
        .await
        .map_err(ApiError::upstream("Failed to complete pomodoro session"))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Pomodoro session"))?;
    let session = decode(row).map_err(ApiError::upstream("Failed to complete pomodoro session"))?;

    Ok(Json(ApiResponse::with_message(session, "Pomodoro session completed!")))
}
