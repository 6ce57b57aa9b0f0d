//! Execution handlers: start, status, cancel, progress events, results.

use super::StartExecutionResponse;
use crate::api::AppState;
use crate::error::Error;
use crate::types::{ExecutionId, TaskConfig};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;

/// GET /executions - List known executions, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/executions",
    tag = "executions",
    responses(
        (status = 200, description = "Execution snapshots", body = Vec<crate::types::Execution>)
    )
)]
pub async fn list_executions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list().await)
}

/// POST /executions - Validate a task configuration and queue it
#[utoipa::path(
    post,
    path = "/api/v1/executions",
    tag = "executions",
    request_body = TaskConfig,
    responses(
        (status = 202, description = "Execution queued", body = StartExecutionResponse),
        (status = 400, description = "Configuration rejected"),
        (status = 404, description = "Unknown task"),
        (status = 503, description = "Shutting down")
    )
)]
pub async fn start_execution(
    State(state): State<AppState>,
    Json(config): Json<TaskConfig>,
) -> Result<impl IntoResponse, Error> {
    let execution_id = state.engine.start(config).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartExecutionResponse { execution_id }),
    ))
}

/// GET /executions/:id - Execution status
#[utoipa::path(
    get,
    path = "/api/v1/executions/{id}",
    tag = "executions",
    params(
        ("id" = String, Path, description = "Execution ID")
    ),
    responses(
        (status = 200, description = "Execution snapshot", body = crate::types::Execution),
        (status = 404, description = "Execution not found")
    )
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<ExecutionId>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.engine.status(id).await?))
}

/// POST /executions/:id/cancel - Request cancellation
#[utoipa::path(
    post,
    path = "/api/v1/executions/{id}/cancel",
    tag = "executions",
    params(
        ("id" = String, Path, description = "Execution ID")
    ),
    responses(
        (status = 202, description = "Cancellation requested", body = crate::types::Execution),
        (status = 404, description = "Execution not found"),
        (status = 409, description = "Execution already finished")
    )
)]
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<ExecutionId>,
) -> Result<impl IntoResponse, Error> {
    let execution = state.engine.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// GET /executions/:id/events - Progress stream
///
/// Replays retained updates, then streams live ones. The event name is the
/// progress stage; the stream ends after the terminal update.
#[utoipa::path(
    get,
    path = "/api/v1/executions/{id}/events",
    tag = "executions",
    params(
        ("id" = String, Path, description = "Execution ID")
    ),
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream"),
        (status = 404, description = "Execution not found")
    )
)]
pub async fn execution_events(
    State(state): State<AppState>,
    Path(id): Path<ExecutionId>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>, Error> {
    let updates = state.engine.subscribe(id).await?;

    let sse_stream = updates.filter_map(|update| match serde_json::to_string(&update) {
        Ok(json_data) => Some(Ok(SseEvent::default()
            .event(update.stage.as_str())
            .data(json_data))),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize progress update");
            None
        }
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// GET /executions/:id/result - Terminal result
#[utoipa::path(
    get,
    path = "/api/v1/executions/{id}/result",
    tag = "executions",
    params(
        ("id" = String, Path, description = "Execution ID")
    ),
    responses(
        (status = 200, description = "Terminal result with findings", body = crate::types::QAResult),
        (status = 404, description = "Execution not found or still running")
    )
)]
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<ExecutionId>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.engine.result(id).await?))
}
