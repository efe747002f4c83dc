// --------------------------------------------------
// Category endpoints.
// Names are unique per owner; a category still referenced
// by a task cannot be deleted.
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
use crate::models::{ApiResponse, Category};
use crate::store::{decode, decode_all, Query, Table};
use crate::validation::{parse_id, Schema, Validate, Validated, CATEGORY_CREATE, CATEGORY_UPDATE};

const DUPLICATE_NAME: &str = "A category with this name already exists";
const IN_USE: &str = "Cannot delete a category that has tasks. Move or delete the tasks first.";

fn owned(id: Uuid, user: &AuthUser) -> Query {
    Query::from(Table::Categories)
        .eq("id", id.to_string())
        .eq("user_id", user.id.to_string())
}

async fn exists(state: &AppState, query: Query) -> Result<bool, ApiError> {
    state
        .store
        .select_one(&query.columns("id"))
        .await
        .map(|row| row.is_some())
        .map_err(ApiError::upstream("Failed to load categories"))
}

// Another category of the caller's already uses `name`.
async fn name_taken(state: &AppState, user: &AuthUser, name: &str, except: Option<Uuid>) -> Result<bool, ApiError> {
    let mut query = Query::from(Table::Categories)
        .eq("user_id", user.id.to_string())
        .eq("name", name);
    if let Some(id) = except {
        query = query.neq("id", id.to_string());
    }
    exists(state, query).await
}

// -----------------------------
// GET /api/categories
// Oldest first
// -----------------------------
pub async fn list_categories(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<Category>>>, ApiError> {
    let query = Query::from(Table::Categories)
        .eq("user_id", user.id.to_string())
        .order("created_at", true);

    let rows = state.store.select(&query).await.map_err(ApiError::upstream("Failed to load categories"))?;
    let categories = decode_all(rows).map_err(ApiError::upstream("Failed to load categories"))?;
    Ok(Json(ApiResponse::ok(categories)))
}

// -----------------------------
// GET /api/categories/:id
// -----------------------------
pub async fn get_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Category>>, ApiError> {
    let id = parse_id(&id, "id")?;

    let row = state
        .store
        .select_one(&owned(id, &user))
        .await
        .map_err(ApiError::upstream("Failed to load category"))?
        .ok_or_else(|| ApiError::not_found("Category"))?;

    let category = decode(row).map_err(ApiError::upstream("Failed to load category"))?;
    Ok(Json(ApiResponse::ok(category)))
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryInput {
    pub name: String,
    pub color: String,
    pub icon: String,
}

impl Validate for CreateCategoryInput {
    fn schema() -> &'static Schema {
        &CATEGORY_CREATE
    }
}

// -----------------------------
// POST /api/categories
// -----------------------------
pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Validated(input): Validated<CreateCategoryInput>,
) -> Result<impl IntoResponse, ApiError> {
    if name_taken(&state, &user, &input.name, None).await? {
        return Err(ApiError::Conflict(DUPLICATE_NAME.into()));
    }

    let mut row = Map::new();
    row.insert("user_id".into(), Value::String(user.id.to_string()));
    row.insert("name".into(), Value::String(input.name));
    row.insert("color".into(), Value::String(input.color));
    row.insert("icon".into(), Value::String(input.icon));

    let created = state
        .store
        .insert(Table::Categories, row)
        .await
        .map_err(ApiError::upstream("Failed to create category"))?;
    let category: Category = decode(created).map_err(ApiError::upstream("Failed to create category"))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(category, "Category created successfully!"))))
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct CategoryPatch(pub Map<String, Value>);

impl Validate for CategoryPatch {
    fn schema() -> &'static Schema {
        &CATEGORY_UPDATE
    }
}

// -----------------------------
// PUT /api/categories/:id
// -----------------------------
pub async fn update_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Validated(patch): Validated<CategoryPatch>,
) -> Result<Json<ApiResponse<Category>>, ApiError> {
    let id = parse_id(&id, "id")?;

    if !exists(&state, owned(id, &user)).await? {
        return Err(ApiError::not_found("Category"));
    }
    if let Some(name) = patch.0.get("name").and_then(Value::as_str) {
        if name_taken(&state, &user, name, Some(id)).await? {
            return Err(ApiError::Conflict(DUPLICATE_NAME.into()));
        }
    }

    let row = state
        .store
        .update(&owned(id, &user), patch.0)
        .await
        .map_err(ApiError::upstream("Failed to update category"))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Category"))?;
    let category = decode(row).map_err(ApiError::upstream("Failed to update category"))?;

    Ok(Json(ApiResponse::with_message(category, "Category updated successfully!")))
}

// -----------------------------
// DELETE /api/categories/:id
// Refused while any task still points at the category
// -----------------------------
pub async fn delete_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let id = parse_id(&id, "id")?;

    if !exists(&state, owned(id, &user)).await? {
        return Err(ApiError::not_found("Category"));
    }

    let in_use = Query::from(Table::Tasks).eq("category_id", id.to_string());
    if exists(&state, in_use).await? {
        tracing::debug!(category_id = %id, "delete refused, category in use");
        return Err(ApiError::Conflict(IN_USE.into()));
    }

    state
        .store
        .delete(&owned(id, &user))
        .await
        .map_err(ApiError::upstream("Failed to delete category"))?;

    Ok(Json(ApiResponse::message("Category deleted successfully!")))
}
