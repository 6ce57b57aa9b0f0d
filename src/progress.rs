//! Per-execution progress publishing
//!
//! A [`ProgressTracker`] owns an execution's live statistics, findings and
//! update log. Updates are coalesced: at most one is delivered per
//! `min_interval`, and a newer pending update replaces an older one. A
//! background flusher delivers the pending update once the interval elapses,
//! so the latest state reaches subscribers even when the task goes quiet.
//!
//! Late subscribers first receive the retained log, then live updates.
//! [`ProgressTracker::finish`] emits one terminal update and closes every stream.

use crate::config::ProgressConfig;
use crate::types::{ExecutionId, ExecutionStats, Finding, ProgressUpdate, Severity, Stage};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

impl ProgressUpdate {
    /// Update for `stage` with `current` of `total` done
    pub fn new(execution_id: ExecutionId, stage: Stage, current: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            if stage == Stage::Completed { 100.0 } else { 0.0 }
        } else {
            ((current.min(total) as f64 / total as f64) * 100.0) as f32
        };

        Self {
            execution_id,
            stage,
            current,
            total,
            percentage,
            message: None,
            severity: Severity::Info,
            rate_limit_remaining: None,
            timestamp: Utc::now(),
        }
    }

    /// Builder-style message setter
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builder-style severity setter
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Builder-style rate limit setter
    pub fn with_rate_limit_remaining(mut self, remaining: u32) -> Self {
        self.rate_limit_remaining = Some(remaining);
        self
    }
}

#[derive(Debug)]
struct TrackerState {
    /// Most recent update, delivered or not
    latest: Option<ProgressUpdate>,
    /// Update waiting for the throttle interval
    pending: Option<ProgressUpdate>,
    /// Delivered updates, oldest first, capped at `retention`
    log: VecDeque<ProgressUpdate>,
    last_emit: Option<Instant>,
    last_timestamp: Option<DateTime<Utc>>,
    stats: ExecutionStats,
    findings: Vec<Finding>,
    /// `None` once finished; dropping it closes subscriber streams
    sender: Option<broadcast::Sender<ProgressUpdate>>,
}

/// Publish/subscribe hub for one execution
#[derive(Debug)]
pub struct ProgressTracker {
    execution_id: ExecutionId,
    min_interval: Duration,
    retention: usize,
    state: Mutex<TrackerState>,
    flusher: CancellationToken,
}

impl ProgressTracker {
    /// Create a tracker and start its flusher task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(execution_id: ExecutionId, config: &ProgressConfig) -> Arc<Self> {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        let tracker = Arc::new(Self {
            execution_id,
            min_interval: config.min_interval(),
            retention: config.retention.max(1),
            state: Mutex::new(TrackerState {
                latest: None,
                pending: None,
                log: VecDeque::new(),
                last_emit: None,
                last_timestamp: None,
                stats: ExecutionStats::default(),
                findings: Vec::new(),
                sender: Some(sender),
            }),
            flusher: CancellationToken::new(),
        });

        spawn_flusher(Arc::downgrade(&tracker), tracker.flusher.clone(), tracker.min_interval);
        tracker
    }

    /// Execution this tracker belongs to
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an update, subject to throttling
    ///
    /// Delivered immediately if the last delivery is at least `min_interval`
    /// old; otherwise it replaces any pending update. Ignored after [`finish`](Self::finish).
    pub fn publish(&self, update: ProgressUpdate) {
        let mut state = self.lock();
        if state.sender.is_none() {
            return;
        }
        state.latest = Some(update.clone());

        let now = Instant::now();
        let due = state
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval);

        if due {
            state.pending = None;
            self.emit(&mut state, update, now);
        } else {
            if state.pending.is_some() {
                tracing::trace!(execution_id = %self.execution_id, "Coalescing progress update");
            }
            state.pending = Some(update);
        }
    }

    /// Deliver the pending update if its interval has elapsed
    fn flush_due(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        let due = state
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval);
        if due && let Some(update) = state.pending.take() {
            self.emit(&mut state, update, now);
        }
    }

    fn emit(&self, state: &mut TrackerState, mut update: ProgressUpdate, now: Instant) {
        // Timestamps never go backwards within one execution
        let timestamp = match state.last_timestamp {
            Some(last) if last > update.timestamp => last,
            _ => update.timestamp.max(Utc::now()),
        };
        update.timestamp = timestamp;
        state.last_timestamp = Some(timestamp);
        state.last_emit = Some(now);

        if state.log.len() >= self.retention {
            state.log.pop_front();
        }
        state.log.push_back(update.clone());

        if let Some(sender) = &state.sender {
            // No receivers is fine
            let _ = sender.send(update);
        }
    }

    /// Emit the terminal update and close all subscriber streams
    ///
    /// Any pending update is superseded. Later calls are no-ops.
    pub fn finish(&self, update: ProgressUpdate) {
        let mut state = self.lock();
        if state.sender.is_none() {
            return;
        }
        state.pending = None;
        state.latest = Some(update.clone());
        self.emit(&mut state, update, Instant::now());
        state.sender = None;
        drop(state);

        self.flusher.cancel();
        tracing::debug!(execution_id = %self.execution_id, "Progress stream closed");
    }

    /// Whether [`finish`](Self::finish) has been called
    pub fn is_finished(&self) -> bool {
        self.lock().sender.is_none()
    }

    /// Stream of updates: the retained log, then live updates until finish
    ///
    /// Dropping the stream detaches the subscriber without affecting the task.
    /// A subscriber that falls more than `channel_capacity` updates behind
    /// skips the missed ones.
    pub fn subscribe(&self) -> BoxStream<'static, ProgressUpdate> {
        let state = self.lock();
        let replay: Vec<ProgressUpdate> = state.log.iter().cloned().collect();
        let live = state.sender.as_ref().map(broadcast::Sender::subscribe);
        drop(state);

        let replay = stream::iter(replay);
        match live {
            Some(receiver) => replay
                .chain(BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() }))
                .boxed(),
            None => replay.boxed(),
        }
    }

    /// Most recent update, including one still waiting for its interval
    pub fn latest(&self) -> Option<ProgressUpdate> {
        self.lock().latest.clone()
    }

    /// Retained delivered updates, oldest first
    pub fn history(&self) -> Vec<ProgressUpdate> {
        self.lock().log.iter().cloned().collect()
    }

    /// Append a finding
    pub fn add_finding(&self, finding: Finding) {
        let mut state = self.lock();
        *state
            .stats
            .findings_by_type
            .entry(finding.kind.as_str().to_string())
            .or_insert(0) += 1;
        state.findings.push(finding);
    }

    /// Mutate the statistics in place
    pub fn update_stats(&self, f: impl FnOnce(&mut ExecutionStats)) {
        f(&mut self.lock().stats);
    }

    /// Current statistics
    pub fn stats(&self) -> ExecutionStats {
        self.lock().stats.clone()
    }

    /// Findings recorded so far, in order
    pub fn findings(&self) -> Vec<Finding> {
        self.lock().findings.clone()
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.flusher.cancel();
    }
}

/// Spawn the task that delivers coalesced updates once their interval elapses
fn spawn_flusher(
    tracker: std::sync::Weak<ProgressTracker>,
    cancel_token: CancellationToken,
    min_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(min_interval.max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match tracker.upgrade() {
                        Some(tracker) => tracker.flush_due(),
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FindingKind;

    fn config() -> ProgressConfig {
        ProgressConfig {
            min_interval_ms: 500,
            retention: 5,
            channel_capacity: 64,
        }
    }

    fn update(id: ExecutionId, current: u64) -> ProgressUpdate {
        ProgressUpdate::new(id, Stage::Processing, current, 100)
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_coalesced_latest_wins() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());
        let mut stream = tracker.subscribe();

        for i in 1..=50 {
            tracker.publish(update(id, i));
        }

        // First update goes straight through, the rest coalesce
        assert_eq!(stream.next().await.unwrap().current, 1);
        assert_eq!(tracker.latest().unwrap().current, 50);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(stream.next().await.unwrap().current, 50);
        assert_eq!(tracker.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_rate_is_bounded() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());
        let stream = tracker.subscribe();

        // 10 updates per second for 3 seconds against a 500ms interval
        for i in 0..30 {
            tracker.publish(update(id, i));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // Let the flusher deliver the last pending update
        tokio::time::sleep(Duration::from_millis(600)).await;
        tracker.finish(ProgressUpdate::new(id, Stage::Completed, 30, 30));

        let delivered: Vec<ProgressUpdate> = stream
            .filter(|u| futures::future::ready(u.stage == Stage::Processing))
            .collect()
            .await;

        assert!(
            delivered.len() <= 3000 / 500 + 1,
            "{} updates delivered in 3s",
            delivered.len()
        );
        assert!(delivered.len() >= 5, "updates keep flowing while publishing");
        assert_eq!(delivered.first().unwrap().current, 0);
        assert_eq!(delivered.last().unwrap().current, 29, "latest update is never lost");
    }

    #[tokio::test(start_paused = true)]
    async fn finish_emits_terminal_update_and_closes_streams() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());
        let stream_a = tracker.subscribe();
        let stream_b = tracker.subscribe();

        tracker.publish(update(id, 10));
        tracker.publish(update(id, 20));
        tracker.finish(
            ProgressUpdate::new(id, Stage::Completed, 100, 100).with_severity(Severity::Success),
        );

        let a: Vec<ProgressUpdate> = stream_a.collect().await;
        let b: Vec<ProgressUpdate> = stream_b.collect().await;

        assert_eq!(a.len(), 2, "pending update is superseded by the terminal one");
        assert_eq!(a.last().unwrap().stage, Stage::Completed);
        assert_eq!(a, b);
        assert!(tracker.is_finished());

        // Publishing after finish is ignored
        tracker.publish(update(id, 99));
        assert_eq!(tracker.latest().unwrap().stage, Stage::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_gets_replay_then_closes() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());

        tracker.publish(update(id, 1));
        tokio::time::sleep(Duration::from_millis(600)).await;
        tracker.publish(update(id, 2));
        tracker.finish(ProgressUpdate::new(id, Stage::Completed, 2, 2));

        let replay: Vec<u64> = tracker.subscribe().map(|u| u.current).collect().await;
        assert_eq!(replay, [1, 2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn retention_keeps_newest_updates() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());

        for i in 0..10 {
            tracker.publish(update(id, i));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let kept: Vec<u64> = tracker.history().iter().map(|u| u.current).collect();
        assert_eq!(kept, [5, 6, 7, 8, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_subscriber_does_not_affect_publisher() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());
        drop(tracker.subscribe());

        tracker.publish(update(id, 1));
        tracker.finish(ProgressUpdate::new(id, Stage::Completed, 1, 1));
        assert_eq!(tracker.history().len(), 2);
    }

    #[tokio::test]
    async fn findings_are_counted_by_type() {
        let id = ExecutionId::new();
        let tracker = ProgressTracker::start(id, &config());

        tracker.add_finding(Finding::execution_level(FindingKind::Info, "a"));
        tracker.add_finding(Finding::execution_level(FindingKind::Error, "b"));
        tracker.add_finding(Finding::execution_level(FindingKind::Info, "c"));
        tracker.update_stats(|s| s.items_processed += 3);

        let stats = tracker.stats();
        assert_eq!(stats.findings_by_type["info"], 2);
        assert_eq!(stats.findings_by_type["error"], 1);
        assert_eq!(stats.items_processed, 3);
        assert_eq!(tracker.findings()[1].description.as_deref(), Some("b"));
    }

    #[test]
    fn percentage_handles_empty_totals() {
        let id = ExecutionId::new();
        assert_eq!(ProgressUpdate::new(id, Stage::Processing, 0, 0).percentage, 0.0);
        assert_eq!(ProgressUpdate::new(id, Stage::Completed, 0, 0).percentage, 100.0);
        assert_eq!(ProgressUpdate::new(id, Stage::Processing, 1, 4).percentage, 25.0);
    }
}
