//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the lms-qa REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the lms-qa REST API
///
/// Served as JSON at `/api/v1/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "lms-qa REST API",
        version = "0.1.0",
        description = "Run bulk content QA tasks (find/replace, URL inventory) against an LMS course, follow their progress and read their results",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Tasks
        crate::api::routes::list_tasks,

        // Executions
        crate::api::routes::list_executions,
        crate::api::routes::start_execution,
        crate::api::routes::get_execution,
        crate::api::routes::cancel_execution,
        crate::api::routes::execution_events,
        crate::api::routes::get_result,

        // History
        crate::api::routes::get_history,

        // System
        crate::api::routes::health_check,
        crate::api::routes::rate_limit_status,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::ExecutionId,
        crate::types::ExecutionStatus,
        crate::types::Stage,
        crate::types::Severity,
        crate::types::FindingKind,
        crate::types::ContentKind,
        crate::types::ContentRef,
        crate::types::UrlMapping,
        crate::types::RewriteOptions,
        crate::types::TaskConfig,
        crate::types::ValidationResult,
        crate::types::ExecutionStats,
        crate::types::Execution,
        crate::types::ProgressUpdate,
        crate::types::Finding,
        crate::types::QAResult,
        crate::types::HistoryEntry,

        // Task registry
        crate::registry::TaskInfo,

        // Rate limiter
        crate::rate_limiter::RateLimitState,
        crate::rate_limiter::WindowState,

        // API request/response types
        crate::api::routes::HistoryQuery,
        crate::api::routes::StartExecutionResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Task types - Discover registered tasks and their configuration schemas"),
        (name = "executions", description = "Executions - Start, monitor, cancel and read results of task runs"),
        (name = "history", description = "History - Finished executions, most recent first"),
        (name = "system", description = "System endpoints - Health checks, rate limiter state, OpenAPI spec"),
    )
)]
pub struct ApiDoc;
