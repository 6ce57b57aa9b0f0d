//! REST API server module
//!
//! Exposes task discovery, execution control, live progress (server-sent
//! events), results and history over HTTP under `/api/v1`.

use crate::{Config, ExecutionEngine, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Tasks
/// - `GET /api/v1/tasks` - List registered task types
///
/// ## Executions
/// - `GET /api/v1/executions` - List known executions
/// - `POST /api/v1/executions` - Validate a task configuration and queue it
/// - `GET /api/v1/executions/:id` - Execution status
/// - `POST /api/v1/executions/:id/cancel` - Request cancellation
/// - `GET /api/v1/executions/:id/events` - Progress stream (server-sent events)
/// - `GET /api/v1/executions/:id/result` - Terminal result
///
/// ## History
/// - `GET /api/v1/history` - Finished executions (with pagination)
///
/// ## System
/// - `GET /api/v1/health` - Health check
/// - `GET /api/v1/rate-limit` - Shared rate limiter state
/// - `GET /api/v1/openapi.json` - OpenAPI specification
pub fn create_router(engine: ExecutionEngine, config: Arc<Config>) -> Router {
    let state = AppState::new(engine, config.clone());

    let api = Router::new()
        // Tasks
        .route("/tasks", get(routes::list_tasks))
        // Executions
        .route("/executions", get(routes::list_executions))
        .route("/executions", post(routes::start_execution))
        .route("/executions/:id", get(routes::get_execution))
        .route("/executions/:id/cancel", post(routes::cancel_execution))
        .route("/executions/:id/events", get(routes::execution_events))
        .route("/executions/:id/result", get(routes::get_result))
        // History
        .route("/history", get(routes::get_history))
        // System
        .route("/health", get(routes::health_check))
        .route("/rate-limit", get(routes::rate_limit_status))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin; otherwise only the listed
/// origins are allowed. Methods and headers are unrestricted.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address
///
/// Runs until the listener fails or the process stops.
///
/// # Example
///
/// ```no_run
/// use lms_qa::{Config, ExecutionEngine};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let engine = ExecutionEngine::new((*config).clone()).await?;
///
/// lms_qa::api::start_api_server(engine, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(engine: ExecutionEngine, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(engine, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
