//! Task discovery handlers.

use crate::api::AppState;
use axum::{Json, extract::State, response::IntoResponse};

/// GET /tasks - List registered task types
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "Registered task types in registration order", body = Vec<crate::registry::TaskInfo>)
    )
)]
pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.tasks())
}
