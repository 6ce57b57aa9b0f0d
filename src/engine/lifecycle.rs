//! Shutdown coordination.

use super::ExecutionEngine;
use crate::error::Result;
use crate::types::{ExecutionId, ExecutionStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// How long shutdown waits for running executions to observe cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between checks while waiting for running executions
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl ExecutionEngine {
    /// Gracefully shut down the engine
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new executions
    /// 2. Cancels queued executions immediately
    /// 3. Signals cancellation to running executions
    /// 4. Waits (up to 30 seconds) for running executions to finish
    ///
    /// Executions still running after the wait end through their own timeout.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.state.accepting_new.store(false, Ordering::SeqCst);

        let pending: Vec<ExecutionId> = {
            let executions = self.state.executions.lock().await;
            executions
                .iter()
                .filter(|(_, record)| !record.execution.status.is_terminal())
                .inspect(|(_, record)| record.cancel_token.cancel())
                .filter(|(_, record)| record.execution.status == ExecutionStatus::Pending)
                .map(|(id, _)| *id)
                .collect()
        };
        self.state.shutdown_token.cancel();

        for id in &pending {
            self.finalize(*id, ExecutionStatus::Cancelled, None).await;
        }
        tracing::info!(cancelled = pending.len(), "Cancelled queued executions");

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_executions()).await {
            Ok(()) => tracing::info!("All running executions finished"),
            Err(_) => tracing::warn!("Timeout waiting for executions to finish, proceeding with shutdown"),
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_executions(&self) {
        loop {
            let active_count = self.active_count().await;
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for running executions to finish");
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        !self.state.accepting_new.load(Ordering::SeqCst)
    }
}
