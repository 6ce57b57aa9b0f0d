//! Database layer for lms-qa
//!
//! Persists terminal [`QAResult`](crate::types::QAResult) records in SQLite.
//! The store is write-once per execution and read-many.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`results`] — Execution result storage and history queries

use crate::types::{ExecutionId, ExecutionStatus, HistoryEntry};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod results;

/// History row from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct ResultRow {
    /// Execution id (UUID text)
    pub execution_id: String,
    /// Task that ran
    pub task_name: String,
    /// Terminal status name
    pub status: String,
    /// Number of findings in the stored result
    pub findings: i64,
    /// Unix timestamp when the execution finished
    pub completed_at: i64,
}

impl TryFrom<ResultRow> for HistoryEntry {
    type Error = crate::Error;

    fn try_from(row: ResultRow) -> crate::Result<Self> {
        use chrono::{TimeZone, Utc};

        let execution_id: ExecutionId = row.execution_id.parse().map_err(|_| {
            crate::Error::Other(format!("stored execution id '{}' is not a UUID", row.execution_id))
        })?;

        Ok(HistoryEntry {
            execution_id,
            task_name: row.task_name,
            status: parse_status(&row.status)?,
            findings: row.findings.max(0) as u64,
            completed_at: Utc
                .timestamp_opt(row.completed_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

fn parse_status(value: &str) -> crate::Result<ExecutionStatus> {
    match value {
        "pending" => Ok(ExecutionStatus::Pending),
        "running" => Ok(ExecutionStatus::Running),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        other => Err(crate::Error::Other(format!("unknown stored status '{other}'"))),
    }
}

/// Database handle for lms-qa
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
