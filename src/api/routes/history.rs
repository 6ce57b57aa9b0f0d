//! History handlers.

use super::HistoryQuery;
use crate::api::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// GET /history - Finished executions, most recent first (with pagination)
#[utoipa::path(
    get,
    path = "/api/v1/history",
    tag = "history",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of items to return"),
        ("offset" = Option<i64>, Query, description = "Number of items to skip")
    ),
    responses(
        (status = 200, description = "Execution history", body = Vec<crate::types::HistoryEntry>),
        (status = 400, description = "Invalid query parameters"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000) as usize;
    let offset = query.offset.unwrap_or(0).max(0) as usize;

    let entries = match state.engine.history(limit, offset).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query history");
            return e.into_response();
        }
    };

    match state.engine.history_total().await {
        Ok(total) => (
            StatusCode::OK,
            Json(json!({
                "items": entries,
                "total": total,
                "limit": limit,
                "offset": offset
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to count history");
            e.into_response()
        }
    }
}
