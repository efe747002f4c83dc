// --------------------------------------------------
// Error taxonomy shared by the store clients and the HTTP layer.
//
// Handlers never build error responses by hand: they return
// ApiError and the normalizer middleware in app.rs logs it.
// --------------------------------------------------

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Failure talking to the record store or the identity provider.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("unexpected record shape: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid request data")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{what} not found"))
    }

    /// Adapter for `map_err` on store calls.
    pub fn upstream(context: &'static str) -> impl FnOnce(StoreError) -> ApiError {
        move |source| ApiError::Upstream { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Attached to 5xx responses so the normalizer can log and redact them.
#[derive(Debug, Clone)]
pub struct UpstreamFailure(pub String);

pub fn envelope(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        match self {
            ApiError::Validation(details) => (
                status,
                Json(json!({ "success": false, "error": message, "details": details })),
            )
                .into_response(),
            ApiError::Upstream { .. } => {
                let mut response = envelope(status, &message);
                response.extensions_mut().insert(UpstreamFailure(message));
                response
            }
            _ => envelope(status, &message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(ApiError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::invalid("title", "required").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("Task").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("dup".into()).status(), StatusCode::BAD_REQUEST);
        let upstream = ApiError::upstream("Failed to load tasks")(StoreError::Api {
            status: 503,
            message: "connection refused".into(),
        });
        assert_eq!(upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(upstream.to_string(), "Failed to load tasks: connection refused");
    }

    #[test]
    fn upstream_response_carries_failure_marker() {
        let response = ApiError::upstream("Failed to delete task")(StoreError::Api {
            status: 500,
            message: "boom".into(),
        })
        .into_response();
        let failure = response.extensions().get::<UpstreamFailure>().unwrap();
        assert_eq!(failure.0, "Failed to delete task: boom");
    }
}
