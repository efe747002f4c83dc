// --------------------------------------------------
// Caller's own profile and account removal.
// --------------------------------------------------

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, Profile};
use crate::store::{decode, Query, Table};
use crate::validation::{Schema, Validate, Validated, PROFILE_UPDATE};

fn own_profile(user: &AuthUser) -> Query {
    Query::from(Table::Profiles).eq("id", user.id.to_string())
}

// -----------------------------
// GET /api/profile
// -----------------------------
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let row = state
        .store
        .select_one(&own_profile(&user))
        .await
        .map_err(ApiError::upstream("Failed to load profile"))?
        .ok_or_else(|| ApiError::not_found("Profile"))?;

    let profile = decode(row).map_err(ApiError::upstream("Failed to load profile"))?;
    Ok(Json(ApiResponse::ok(profile)))
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct ProfilePatch(pub Map<String, Value>);

impl Validate for ProfilePatch {
    fn schema() -> &'static Schema {
        &PROFILE_UPDATE
    }
}

// -----------------------------
// PUT | PATCH /api/profile
// Both verbs apply a partial update
// -----------------------------
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Validated(patch): Validated<ProfilePatch>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let existing = state
        .store
        .select_one(&own_profile(&user).columns("id"))
        .await
        .map_err(ApiError::upstream("Failed to load profile"))?;
    if existing.is_none() {
        return Err(ApiError::not_found("Profile"));
    }

    let row = state
        .store
        .update(&own_profile(&user), patch.0)
        .await
        .map_err(ApiError::upstream("Failed to update profile"))?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Profile"))?;
    let profile = decode(row).map_err(ApiError::upstream("Failed to update profile"))?;

    Ok(Json(ApiResponse::with_message(profile, "Profile updated successfully!")))
}

// -----------------------------
// DELETE /api/profile
// Deletes the account at the identity provider; owned rows cascade
// -----------------------------
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state
        .identity
        .delete_user(user.id)
        .await
        .map_err(ApiError::upstream("Failed to delete account"))?;

    tracing::info!(user_id = %user.id, email = ?user.email, "account deleted");
    Ok(Json(ApiResponse::message(
        "Account deleted successfully. Your data has been permanently removed.",
    )))
}
