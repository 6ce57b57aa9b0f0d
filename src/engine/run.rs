//! Running one execution and finalizing it.

use super::{ExecutionEngine, ExecutionRecord};
use crate::error::Error;
use crate::registry::Task;
use crate::tasks::TaskContext;
use crate::types::{
    ExecutionId, ExecutionStatus, Finding, FindingKind, ProgressUpdate, QAResult, Severity, Stage,
    TaskConfig,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A claimed execution, ready to run
pub(crate) struct PreparedExecution {
    pub(crate) id: ExecutionId,
    pub(crate) task: Arc<dyn Task>,
    pub(crate) ctx: TaskContext,
    pub(crate) timeout: Duration,
}

impl ExecutionEngine {
    /// Hard timeout for one execution, clamped to the configured bounds
    pub(crate) fn effective_timeout(&self, config: &TaskConfig) -> Duration {
        let engine = &self.config.engine;
        config
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(engine.default_timeout)
            .clamp(engine.min_timeout, engine.max_timeout.max(engine.min_timeout))
    }

    /// Move a queued execution to `running`
    ///
    /// Returns `None` if it was cancelled while waiting for a worker.
    pub(crate) async fn begin(&self, id: ExecutionId) -> Option<PreparedExecution> {
        let mut executions = self.state.executions.lock().await;
        let record = executions.get_mut(&id)?;

        if record.execution.status != ExecutionStatus::Pending || record.cancel_token.is_cancelled()
        {
            tracing::debug!(execution_id = %id, "Skipping execution cancelled while queued");
            return None;
        }

        record.execution.status = ExecutionStatus::Running;
        record.execution.started_at = Some(Utc::now());
        record.started = Some(Instant::now());

        let ctx = TaskContext::new(
            id,
            Arc::clone(&record.config),
            Arc::clone(&record.content),
            Arc::clone(&record.tracker),
            record.cancel_token.clone(),
        )
        .with_limiter(self.limiter.clone());

        Some(PreparedExecution {
            id,
            task: record.descriptor.instantiate(),
            timeout: self.effective_timeout(&record.config),
            ctx,
        })
    }

    /// Run the task body under its timeout, then finalize
    ///
    /// The task runs in its own Tokio task so a panic or a stall cannot keep
    /// the execution from reaching a terminal state.
    pub(crate) async fn run_execution(&self, prepared: PreparedExecution) {
        let PreparedExecution {
            id,
            task,
            ctx,
            timeout,
        } = prepared;
        let tracker = Arc::clone(&ctx.tracker);

        tracing::info!(
            execution_id = %id,
            task = %ctx.config.task_name,
            timeout_secs = timeout.as_secs(),
            "Execution started"
        );
        tracker.publish(
            ProgressUpdate::new(id, Stage::Validating, 0, 0)
                .with_message(format!("Starting {}", ctx.config.task_name)),
        );

        let mut handle = tokio::spawn(async move { task.execute(&ctx).await });

        let (status, error) = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => (ExecutionStatus::Completed, None),
            Ok(Ok(Err(Error::Cancelled))) => (ExecutionStatus::Cancelled, None),
            Ok(Ok(Err(e))) => {
                tracing::error!(execution_id = %id, error = %e, "Execution failed");
                tracker.add_finding(Finding::execution_level(FindingKind::Error, e.to_string()));
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    "task panicked".to_string()
                } else {
                    format!("task aborted: {join_error}")
                };
                tracing::error!(execution_id = %id, error = %message, "Execution crashed");
                tracker.add_finding(Finding::execution_level(FindingKind::Error, message.clone()));
                (ExecutionStatus::Failed, Some(message))
            }
            Err(_) => {
                handle.abort();
                let e = Error::Timeout {
                    seconds: timeout.as_secs(),
                };
                tracing::error!(execution_id = %id, timeout_secs = timeout.as_secs(), "Execution timed out");
                tracker.add_finding(Finding::execution_level(FindingKind::Error, e.to_string()));
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
        };

        self.finalize(id, status, error).await;
    }

    /// Apply the terminal transition, persist the result and close progress streams
    ///
    /// Only the first call for an execution has any effect.
    pub(crate) async fn finalize(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
    ) {
        let (result, tracker) = {
            let mut executions = self.state.executions.lock().await;
            let Some(record) = executions.get_mut(&id) else {
                return;
            };

            let current = record.execution.status;
            if !current.can_transition_to(status) {
                tracing::debug!(
                    execution_id = %id,
                    from = current.as_str(),
                    to = status.as_str(),
                    "Ignoring terminal transition"
                );
                return;
            }

            let latest = record.tracker.latest();
            let total = latest.as_ref().map_or(0, |u| u.total);
            record.tracker.publish(
                ProgressUpdate::new(id, Stage::GeneratingResults, total, total)
                    .with_message("Generating results"),
            );

            let stats = record.live_stats();
            let completed_at = Utc::now();

            record.execution.status = status;
            record.execution.completed_at = Some(completed_at);
            record.execution.stats = stats.clone();
            record.execution.error = error.clone();
            record.execution.progress = match status {
                ExecutionStatus::Completed => 100.0,
                _ => latest.map_or(0.0, |u| u.percentage),
            };

            let result = QAResult {
                execution_id: id,
                task_name: record.execution.task_name.clone(),
                status,
                started_at: record.execution.started_at,
                completed_at,
                stats,
                findings: record.tracker.findings(),
                error,
            };
            (Arc::new(result), Arc::clone(&record.tracker))
        };

        let persisted = match &self.db {
            Some(db) => match db.insert_result(&result).await {
                Ok(()) => true,
                Err(e) => {
                    // The execution still ends in its terminal state
                    tracing::error!(execution_id = %id, error = %e, "Failed to persist result");
                    false
                }
            },
            None => false,
        };

        tracker.finish(terminal_update(&result));

        tracing::info!(
            execution_id = %id,
            status = status.as_str(),
            items_processed = result.stats.items_processed,
            items_replaced = result.stats.items_replaced,
            findings = result.findings.len(),
            errors = result.stats.errors,
            "Execution finished"
        );

        let mut executions = self.state.executions.lock().await;
        if let Some(record) = executions.get(&id) {
            record.result.send_replace(Some(result));
        }
        if persisted {
            self.retire(&mut executions, id).await;
        }
    }

    /// Drop persisted finished records beyond the in-memory retention limit
    async fn retire(&self, executions: &mut HashMap<ExecutionId, ExecutionRecord>, id: ExecutionId) {
        let mut retired = self.state.retired.lock().await;
        retired.push_back(id);
        while retired.len() > self.config.engine.retained_finished {
            let Some(oldest) = retired.pop_front() else {
                break;
            };
            executions.remove(&oldest);
            tracing::debug!(execution_id = %oldest, "Dropped finished execution from memory");
        }
    }
}

/// Final progress update for a finished execution
pub(crate) fn terminal_update(result: &QAResult) -> ProgressUpdate {
    let (severity, message) = match result.status {
        ExecutionStatus::Completed => (Severity::Success, "Execution completed".to_string()),
        ExecutionStatus::Cancelled => (Severity::Warning, "Execution cancelled".to_string()),
        _ => (
            Severity::Error,
            format!(
                "Execution failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ),
        ),
    };
    let processed = result.stats.items_processed;
    ProgressUpdate::new(result.execution_id, Stage::Completed, processed, processed)
        .with_message(message)
        .with_severity(severity)
}
