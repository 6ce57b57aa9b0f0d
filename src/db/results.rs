//! Execution result storage.

use crate::error::DatabaseError;
use crate::types::{ExecutionId, HistoryEntry, QAResult};
use crate::{Error, Result};

use super::{Database, ResultRow};

impl Database {
    /// Store the terminal result of an execution
    ///
    /// Each execution is stored at most once; a second insert for the same id
    /// fails with [`DatabaseError::ConstraintViolation`].
    pub async fn insert_result(&self, result: &QAResult) -> Result<()> {
        let json = serde_json::to_string(result)?;

        let outcome = sqlx::query(
            r#"
            INSERT INTO results (execution_id, task_name, status, findings, result_json, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.execution_id.to_string())
        .bind(&result.task_name)
        .bind(result.status.as_str())
        .bind(result.findings.len() as i64)
        .bind(json)
        .bind(result.completed_at.timestamp())
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::Database(
                DatabaseError::ConstraintViolation(format!(
                    "result for execution {} already stored",
                    result.execution_id
                )),
            )),
            Err(e) => Err(Error::Sqlx(e)),
        }
    }

    /// Fetch the stored result of one execution
    pub async fn get_result(&self, id: ExecutionId) -> Result<Option<QAResult>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT result_json FROM results WHERE execution_id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        json.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    /// Query stored results, most recent first
    pub async fn list_results(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT execution_id, task_name, status, findings, completed_at
            FROM results
            ORDER BY completed_at DESC, execution_id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    /// Number of stored results
    pub async fn count_results(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM results")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}
