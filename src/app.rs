// --------------------------------------------------
// Router assembly and cross-cutting middleware.
//
// Layout:
//   /                service banner
//   /api/health      no auth
//   /api/...         bearer auth, rate limited
// Anything else falls through to a JSON 404.
// --------------------------------------------------

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, put},
    Json, Router,
};
use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::auth::require_auth;
use crate::config::{Config, StoreBackend};
use crate::error::{envelope, ApiError, UpstreamFailure};
use crate::identity::IdentityProvider;
use crate::logic::iso;
use crate::store::{memory::InMemoryStore, postgrest::SupabaseClient, RecordStore};
use crate::{routes_analytics, routes_categories, routes_profile, routes_subtasks, routes_tasks};

const BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<Config>,
    pub limiter: Option<Arc<DefaultKeyedRateLimiter<IpAddr>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, identity: Arc<dyn IdentityProvider>, config: Config) -> Self {
        let limiter = rate_limiter(&config);
        Self { store, identity, config: Arc::new(config), limiter }
    }

    /// Wires the configured backend. The hosted client serves both seams.
    pub fn from_config(config: Config) -> Self {
        match (config.backend, config.supabase.clone()) {
            (StoreBackend::Supabase, Some(supabase)) => {
                let client = Arc::new(SupabaseClient::new(&supabase.url, supabase.service_key));
                Self::new(client.clone(), client, config)
            }
            _ => {
                tracing::warn!("using the in-memory store; data is lost on restart");
                let memory = Arc::new(InMemoryStore::new());
                Self::new(memory.clone(), memory, config)
            }
        }
    }
}

// `max` requests per window and client IP, refilled evenly; None when disabled.
fn rate_limiter(config: &Config) -> Option<Arc<DefaultKeyedRateLimiter<IpAddr>>> {
    let max = NonZeroU32::new(config.rate_limit_max_requests)?;
    let quota = Quota::with_period(config.rate_limit_window / max.get())?.allow_burst(max);
    Some(Arc::new(RateLimiter::keyed(quota)))
}

// Peer address from the connection; servers started without connect info share one bucket.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        // tasks
        .route("/tasks", get(routes_tasks::list_tasks).post(routes_tasks::create_task))
        .route("/tasks/today", get(routes_tasks::today_tasks))
        .route("/tasks/overdue", get(routes_tasks::overdue_tasks))
        .route("/tasks/reorder", put(routes_tasks::reorder_tasks))
        .route(
            "/tasks/:id",
            get(routes_tasks::get_task)
                .put(routes_tasks::update_task)
                .delete(routes_tasks::delete_task),
        )
        .route("/tasks/:id/toggle", patch(routes_tasks::toggle_task))
        // subtasks
        .route(
            "/tasks/:id/subtasks",
            get(routes_subtasks::list_subtasks).post(routes_subtasks::create_subtask),
        )
        .route(
            "/tasks/:id/subtasks/:subtask_id",
            put(routes_subtasks::update_subtask).delete(routes_subtasks::delete_subtask),
        )
        .route("/tasks/:id/subtasks/:subtask_id/toggle", patch(routes_subtasks::toggle_subtask))
        // categories
        .route(
            "/categories",
            get(routes_categories::list_categories).post(routes_categories::create_category),
        )
        .route(
            "/categories/:id",
            get(routes_categories::get_category)
                .put(routes_categories::update_category)
                .delete(routes_categories::delete_category),
        )
        // profile
        .route(
            "/profile",
            get(routes_profile::get_profile)
                .put(routes_profile::update_profile)
                .patch(routes_profile::update_profile)
                .delete(routes_profile::delete_account),
        )
        // analytics
        .route("/analytics/statistics", get(routes_analytics::statistics))
        .route("/analytics/productivity", get(routes_analytics::productivity))
        .route("/analytics/categories", get(routes_analytics::category_distribution))
        .route("/analytics/priorities", get(routes_analytics::priority_distribution))
        .route("/analytics/activity", get(routes_analytics::activity))
        .route(
            "/analytics/pomodoro",
            get(routes_analytics::list_pomodoro).post(routes_analytics::create_pomodoro),
        )
        .route("/analytics/pomodoro/:id/complete", patch(routes_analytics::complete_pomodoro))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), normalize_errors))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(config: &Config) -> CorsLayer {
    let origin = match HeaderValue::from_str(&config.frontend_url) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(e) => {
            tracing::warn!(frontend_url = %config.frontend_url, error = %e, "invalid FRONTEND_URL, cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    if let Some(limiter) = &state.limiter {
        let ip = client_ip(&req);
        if limiter.check_key(&ip).is_err() {
            tracing::warn!(%ip, path = %req.uri().path(), "rate limit exceeded");
            return Err(ApiError::RateLimited);
        }
    }
    Ok(next.run(req).await)
}

// Logs 5xx failures raised by handlers; production hides their detail.
async fn normalize_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    if let Some(UpstreamFailure(message)) = response.extensions_mut().remove::<UpstreamFailure>() {
        tracing::error!(%method, %path, status = response.status().as_u16(), error = %message, "request failed");
        if state.config.production {
            return envelope(response.status(), "Internal server error");
        }
    }
    response
}

async fn not_found(method: Method, uri: Uri) -> Response {
    envelope(StatusCode::NOT_FOUND, &format!("Route not found: {method} {}", uri.path()))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "TaskFlow API is running",
        "timestamp": iso(Utc::now()),
    }))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "TaskFlow API",
        "version": env!("CARGO_PKG_VERSION"),
        "documentation": "/api/health",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn each_client_gets_its_own_quota() {
        let config = Config { rate_limit_max_requests: 2, ..Config::default() };
        let limiter = rate_limiter(&config).unwrap();
        let first: IpAddr = "203.0.113.7".parse().unwrap();
        let second: IpAddr = "198.51.100.20".parse().unwrap();

        assert!(limiter.check_key(&first).is_ok());
        assert!(limiter.check_key(&first).is_ok());
        assert!(limiter.check_key(&first).is_err());

        assert!(limiter.check_key(&second).is_ok());
        assert!(limiter.check_key(&second).is_ok());
        assert!(limiter.check_key(&second).is_err());
    }

    #[test]
    fn zero_max_disables_limiting() {
        let config = Config { rate_limit_max_requests: 0, ..Config::default() };
        assert!(rate_limiter(&config).is_none());
    }

    #[test]
    fn window_is_spread_over_max_requests() {
        let config = Config {
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(900),
            ..Config::default()
        };
        assert!(rate_limiter(&config).is_some());
    }

    #[test]
    fn client_ip_comes_from_connect_info() {
        let mut req = Request::new(axum::body::Body::empty());
        assert_eq!(client_ip(&req), IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let addr: SocketAddr = "192.0.2.1:51000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&req), addr.ip());
    }
}
