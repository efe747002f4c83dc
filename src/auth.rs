// --------------------------------------------------
// Bearer-token gate in front of every /api route
// except the health check.
// --------------------------------------------------

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

/// Caller identity placed in request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req)
        .ok_or_else(|| ApiError::Unauthorized("Authentication token not provided".into()))?;

    let identity = state
        .identity
        .verify(&token)
        .await
        .map_err(ApiError::upstream("Failed to verify token"))?
        .ok_or_else(|| {
            tracing::debug!("token rejected by identity provider");
            ApiError::Unauthorized("Invalid or expired token".into())
        })?;

    tracing::debug!(user_id = %identity.id, "authenticated");
    req.extensions_mut().insert(AuthUser { id: identity.id, email: identity.email });

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication token not provided".into()))
    }
}
