//! Submission, status queries, cancellation and results.

use super::run::terminal_update;
use super::{ExecutionEngine, ExecutionRecord};
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimitState;
use crate::registry::TaskInfo;
use crate::types::{
    Execution, ExecutionId, ExecutionStats, ExecutionStatus, Finding, FindingKind, HistoryEntry,
    ProgressUpdate, QAResult, Stage, TaskConfig,
};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

impl ExecutionEngine {
    /// Validate a configuration and queue an execution
    ///
    /// Returns as soon as the execution is queued. Executions start in
    /// submission order once a worker is free.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownTask`] if no task is registered under `config.task_name`
    /// - [`Error::Validation`] if the task rejects the configuration (no execution is created)
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn start(&self, config: TaskConfig) -> Result<ExecutionId> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let descriptor = self.registry.resolve(&config.task_name)?;
        let task = descriptor.instantiate();

        let mut validation = task.validate_config(&config);
        for kind in &config.content_types {
            if !descriptor.supported_kinds.contains(kind) {
                validation.add_error(format!("task '{}' does not support {kind}", descriptor.name));
            }
        }
        if let Some(seconds) = config.timeout_seconds {
            let engine = &self.config.engine;
            let requested = Duration::from_secs(seconds);
            if seconds > 0 && (requested < engine.min_timeout || requested > engine.max_timeout) {
                validation.add_warning(format!(
                    "timeout_seconds {seconds} is outside {}..={} and will be clamped",
                    engine.min_timeout.as_secs(),
                    engine.max_timeout.as_secs()
                ));
            }
        }

        if !validation.is_valid() {
            tracing::warn!(
                task = %config.task_name,
                errors = validation.errors.len(),
                "Rejected task configuration"
            );
            return Err(Error::validation(validation.errors));
        }

        let id = ExecutionId::new();
        let tracker = crate::progress::ProgressTracker::start(id, &self.config.progress);
        for warning in &validation.warnings {
            tracker.add_finding(Finding::execution_level(FindingKind::Warning, warning.clone()));
        }
        tracker.publish(
            ProgressUpdate::new(id, Stage::Initializing, 0, 0).with_message("Queued for execution"),
        );

        let (content, counters) = self.content.for_execution();
        let (result, _) = watch::channel(None);
        let record = ExecutionRecord {
            execution: Execution {
                id,
                task_name: config.task_name.clone(),
                status: ExecutionStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                progress: 0.0,
                stats: ExecutionStats::default(),
                error: None,
            },
            config: Arc::new(config),
            descriptor,
            tracker,
            cancel_token: CancellationToken::new(),
            content,
            counters,
            started: None,
            result,
        };

        {
            let mut executions = self.state.executions.lock().await;
            // Checked under the lock so shutdown sees every accepted execution
            if !self.state.accepting_new.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            tracing::info!(
                execution_id = %id,
                task = %record.execution.task_name,
                course_id = %record.config.course_id,
                warnings = validation.warnings.len(),
                "Execution queued"
            );
            executions.insert(id, record);
        }

        if self.state.queue_tx.send(id).is_err() {
            self.finalize(id, ExecutionStatus::Cancelled, Some("engine stopped".to_string()))
                .await;
            return Err(Error::ShuttingDown);
        }

        Ok(id)
    }

    /// Current snapshot of one execution
    ///
    /// Finished executions no longer held in memory are rebuilt from the
    /// result store.
    pub async fn status(&self, id: ExecutionId) -> Result<Execution> {
        if let Some(execution) = self
            .state
            .executions
            .lock()
            .await
            .get(&id)
            .map(ExecutionRecord::snapshot)
        {
            return Ok(execution);
        }

        self.stored_result(id)
            .await?
            .map(|result| Execution::from(&result))
            .ok_or_else(|| Error::NotFound(format!("execution {id}")))
    }

    /// Result of an execution that only the result store still knows
    async fn stored_result(&self, id: ExecutionId) -> Result<Option<QAResult>> {
        match &self.db {
            Some(db) => db.get_result(id).await,
            None => Ok(None),
        }
    }

    /// Snapshots of every known execution, oldest first
    pub async fn list(&self) -> Vec<Execution> {
        let mut all: Vec<Execution> = self
            .state
            .executions
            .lock()
            .await
            .values()
            .map(ExecutionRecord::snapshot)
            .collect();
        all.sort_by_key(|e| (e.created_at, e.id));
        all
    }

    /// Request cancellation
    ///
    /// A pending execution is cancelled immediately. A running one stops at
    /// its next cancellation check (between content items) and ends
    /// `cancelled`; the returned snapshot may still say `running`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown id
    /// - [`Error::InvalidState`] if the execution already finished
    pub async fn cancel(&self, id: ExecutionId) -> Result<Execution> {
        let pending = {
            let executions = self.state.executions.lock().await;
            match executions.get(&id) {
                Some(record) => {
                    let status = record.execution.status;
                    if status.is_terminal() {
                        return Err(invalid_cancel(id, status));
                    }

                    record.cancel_token.cancel();
                    tracing::info!(execution_id = %id, status = %status.as_str(), "Cancellation requested");
                    Some(status == ExecutionStatus::Pending)
                }
                None => None,
            }
        };

        let Some(pending) = pending else {
            return match self.stored_result(id).await? {
                Some(result) => Err(invalid_cancel(id, result.status)),
                None => Err(Error::NotFound(format!("execution {id}"))),
            };
        };

        if pending {
            self.finalize(id, ExecutionStatus::Cancelled, None).await;
        }
        self.status(id).await
    }

    /// Wait for the terminal result of an execution
    pub async fn wait(&self, id: ExecutionId) -> Result<QAResult> {
        let receiver = self
            .state
            .executions
            .lock()
            .await
            .get(&id)
            .map(|record| record.result.subscribe());
        let Some(mut receiver) = receiver else {
            return self
                .stored_result(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("execution {id}")));
        };

        let result = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Other(format!("execution {id} was dropped")))?
            .clone();

        result
            .map(|r| (*r).clone())
            .ok_or_else(|| Error::NotFound(format!("result for execution {id}")))
    }

    /// Terminal result of an execution, from memory or the result store
    pub async fn result(&self, id: ExecutionId) -> Result<QAResult> {
        {
            let executions = self.state.executions.lock().await;
            if let Some(record) = executions.get(&id) {
                return record
                    .result
                    .borrow()
                    .as_ref()
                    .map(|r| (**r).clone())
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "result for execution {id} (still {})",
                            record.execution.status.as_str()
                        ))
                    });
            }
        }

        self.stored_result(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("result for execution {id}")))
    }

    /// Finished executions, most recent first
    pub async fn history(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        if let Some(db) = &self.db {
            return db.list_results(limit, offset).await;
        }

        let executions = self.state.executions.lock().await;
        let mut entries: Vec<HistoryEntry> = executions
            .values()
            .filter_map(|record| {
                record.result.borrow().as_ref().map(|r| HistoryEntry {
                    execution_id: r.execution_id,
                    task_name: r.task_name.clone(),
                    status: r.status,
                    findings: r.findings.len() as u64,
                    completed_at: r.completed_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    /// Number of finished executions available through [`history`](Self::history)
    pub async fn history_total(&self) -> Result<u64> {
        if let Some(db) = &self.db {
            return Ok(db.count_results().await?.max(0) as u64);
        }

        let executions = self.state.executions.lock().await;
        Ok(executions
            .values()
            .filter(|record| record.result.borrow().is_some())
            .count() as u64)
    }

    /// Progress stream of one execution
    ///
    /// Replays retained updates, then follows live ones until the execution
    /// finishes. Subscribing to a finished execution yields its retained log,
    /// or only its terminal update once it has been dropped from memory.
    pub async fn subscribe(&self, id: ExecutionId) -> Result<BoxStream<'static, ProgressUpdate>> {
        if let Some(stream) = self
            .state
            .executions
            .lock()
            .await
            .get(&id)
            .map(|record| record.tracker.subscribe())
        {
            return Ok(stream);
        }

        let result = self
            .stored_result(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {id}")))?;
        Ok(futures::stream::iter([terminal_update(&result)]).boxed())
    }

    /// Registered task types, in registration order
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.registry.list().iter().map(|t| t.info()).collect()
    }

    /// Current rate limiter state
    pub async fn rate_limit(&self) -> RateLimitState {
        self.limiter.snapshot().await
    }

    /// Number of executions not yet finished
    pub async fn active_count(&self) -> usize {
        self.state
            .executions
            .lock()
            .await
            .values()
            .filter(|r| !r.execution.status.is_terminal())
            .count()
    }
}

fn invalid_cancel(id: ExecutionId, current_state: ExecutionStatus) -> Error {
    Error::InvalidState {
        id: id.to_string(),
        operation: "cancel".to_string(),
        current_state,
    }
}
