//! System handlers: health, rate limiter state, OpenAPI.

use crate::api::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": if state.engine.is_shutting_down() { "shutting_down" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "active_executions": state.engine.active_count().await,
    }))
}

/// GET /rate-limit - Shared rate limiter state
#[utoipa::path(
    get,
    path = "/api/v1/rate-limit",
    tag = "system",
    responses(
        (status = 200, description = "Remaining calls per window", body = crate::rate_limiter::RateLimitState)
    )
)]
pub async fn rate_limit_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.rate_limit().await)
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
