//! Queue processor: drains the FIFO queue and spawns executions.

use super::ExecutionEngine;
use crate::types::ExecutionId;
use tokio::sync::mpsc;

impl ExecutionEngine {
    /// Start the queue processor task
    ///
    /// This method spawns a background task that continuously:
    /// 1. Waits for the next queued execution (submission order)
    /// 2. Acquires a permit from the concurrency limiter (respects max_concurrent_executions)
    /// 3. Spawns the execution, which holds the permit until it is finalized
    /// 4. Repeats until shutdown
    pub(crate) fn start_queue_processor(
        &self,
        mut queue_rx: mpsc::UnboundedReceiver<ExecutionId>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let shutdown = self.state.shutdown_token.clone();

        tokio::spawn(async move {
            loop {
                let id = tokio::select! {
                    next = queue_rx.recv() => match next {
                        Some(id) => id,
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                };

                let permit = tokio::select! {
                    permit = engine.state.concurrent_limit.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown.cancelled() => break,
                };

                let Some(prepared) = engine.begin(id).await else {
                    continue;
                };

                let runner = engine.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    runner.run_execution(prepared).await;
                });
            }

            tracing::debug!("Queue processor stopped");
        })
    }
}
