//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tasks`] — Registered task types
//! - [`executions`] — Execution control, progress and results
//! - [`history`] — Finished executions
//! - [`system`] — Health, rate limiter state, OpenAPI

use serde::{Deserialize, Serialize};

mod executions;
mod history;
mod system;
mod tasks;

pub use executions::*;
pub use history::*;
pub use system::*;
pub use tasks::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /history
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct HistoryQuery {
    /// Maximum number of items to return (default: 50)
    pub limit: Option<i64>,
    /// Number of items to skip (default: 0)
    pub offset: Option<i64>,
}

/// Response body for POST /executions
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct StartExecutionResponse {
    /// Identifier of the queued execution
    pub execution_id: crate::types::ExecutionId,
}
