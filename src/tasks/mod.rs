//! Built-in tasks and the context they run in

use crate::client::ContentApi;
use crate::error::{ContentError, Error, ErrorPolicy, Result};
use crate::progress::ProgressTracker;
use crate::rate_limiter::RateLimiter;
use crate::registry::TaskDescriptor;
use crate::types::{
    ContentKind, ContentRef, ExecutionId, Finding, FindingKind, ProgressUpdate, Stage, TaskConfig,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod find_replace;
pub mod url_inventory;

pub use find_replace::FindReplaceTask;
pub use url_inventory::UrlInventoryTask;

/// JSON Schema of [`TaskConfig`], derived from its serde shape
pub(crate) fn task_config_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(TaskConfig)).unwrap_or_default()
}

/// Descriptors for every built-in task, in registration order
pub fn builtin_descriptors() -> Vec<TaskDescriptor> {
    vec![find_replace::descriptor(), url_inventory::descriptor()]
}

/// Everything a task needs for one execution
///
/// Tasks never touch engine state directly: progress, statistics and findings
/// go through the [`ProgressTracker`], cancellation through the token.
pub struct TaskContext {
    /// Execution being run
    pub execution_id: ExecutionId,
    /// Validated configuration
    pub config: Arc<TaskConfig>,
    /// Remote content access
    pub content: Arc<dyn ContentApi>,
    /// Progress, statistics and findings sink
    pub tracker: Arc<ProgressTracker>,
    /// Fires when the operator cancels
    pub cancel_token: CancellationToken,
    limiter: Option<RateLimiter>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("execution_id", &self.execution_id)
            .field("task_name", &self.config.task_name)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Create a context
    pub fn new(
        execution_id: ExecutionId,
        config: Arc<TaskConfig>,
        content: Arc<dyn ContentApi>,
        tracker: Arc<ProgressTracker>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            config,
            content,
            tracker,
            cancel_token,
            limiter: None,
        }
    }

    /// Attach the limiter whose remaining budget is reported with progress
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Return [`Error::Cancelled`] if cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            tracing::info!(execution_id = %self.execution_id, "Cancellation observed");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Publish a progress update
    pub async fn report(
        &self,
        stage: Stage,
        current: u64,
        total: u64,
        message: impl Into<String>,
    ) {
        let mut update =
            ProgressUpdate::new(self.execution_id, stage, current, total).with_message(message);
        if let Some(limiter) = &self.limiter {
            let state = limiter.snapshot().await;
            update = update.with_rate_limit_remaining(state.minute.remaining.min(state.hour.remaining));
        }
        self.tracker.publish(update);
    }

    /// Append a finding
    pub fn record(&self, finding: Finding) {
        self.tracker.add_finding(finding);
    }

    /// List every item of the configured content kinds
    ///
    /// Pages are requested lazily, so cancellation stops further listing
    /// requests. A kind the token cannot read is skipped with a finding.
    ///
    /// Listing finishes before any item is fetched so progress updates carry
    /// the real total. Only [`ContentRef`] handles are held here; bodies are
    /// fetched one at a time by the task.
    pub async fn list_items(&self) -> Result<Vec<ContentRef>> {
        let mut items = Vec::new();

        for &kind in &self.config.content_types {
            self.check_cancelled()?;
            self.report(
                Stage::FetchingContent,
                items.len() as u64,
                0,
                format!("Listing {kind}"),
            )
            .await;

            let mut refs = self.content.list(kind, &self.config.course_id);
            while let Some(next) = refs.next().await {
                match next {
                    Ok(item) => items.push(item),
                    Err(error) => {
                        self.skip_kind(kind, error)?;
                        break;
                    }
                }
                self.check_cancelled()?;
            }
        }

        tracing::debug!(
            execution_id = %self.execution_id,
            items = items.len(),
            "Content listing complete"
        );
        Ok(items)
    }

    fn skip_kind(&self, kind: ContentKind, error: ContentError) -> Result<()> {
        match error.policy() {
            ErrorPolicy::SkipItem(finding_kind) => {
                tracing::warn!(
                    execution_id = %self.execution_id,
                    kind = %kind,
                    error = %error,
                    "Skipping content kind"
                );
                let mut finding = Finding::execution_level(
                    finding_kind,
                    format!("Could not list {kind}: {error}"),
                );
                finding.content_type = Some(kind);
                self.record(finding);
                if finding_kind == FindingKind::Error {
                    self.tracker.update_stats(|s| s.errors += 1);
                }
                Ok(())
            }
            _ => Err(Error::Content(error)),
        }
    }

    /// Apply the recovery policy for a failure on one item
    ///
    /// Skippable failures become a finding and `Ok(())`; anything else is
    /// returned so the execution aborts.
    pub fn handle_item_error(&self, item: &ContentRef, error: ContentError) -> Result<()> {
        match error.policy() {
            ErrorPolicy::SkipItem(finding_kind) => {
                tracing::warn!(
                    execution_id = %self.execution_id,
                    kind = %item.kind,
                    content_id = %item.id,
                    error = %error,
                    "Skipping content item"
                );
                self.record(Finding::for_item(finding_kind, item).with_description(error.to_string()));
                if finding_kind == FindingKind::Error {
                    self.tracker.update_stats(|s| s.errors += 1);
                }
                Ok(())
            }
            _ => Err(Error::Content(error)),
        }
    }

    /// Count one fully handled item
    pub fn item_completed(&self, kind: ContentKind) {
        self.tracker.update_stats(|s| {
            s.items_processed += 1;
            *s.items_by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;
        });
    }

    /// Publish per-item progress
    pub async fn report_item(&self, index: usize, total: usize, item: &ContentRef) {
        self.report(
            Stage::Processing,
            index as u64 + 1,
            total as u64,
            format!("Processed {} '{}'", item.kind, item.title),
        )
        .await;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory [`ContentApi`] for task tests

    use super::*;
    use crate::config::ProgressConfig;
    use crate::types::ContentItem;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub struct MemoryContent {
        pub items: Mutex<Vec<ContentItem>>,
        pub failures: Mutex<HashMap<String, ContentError>>,
        pub update_failures: Mutex<HashMap<String, ContentError>>,
        pub updates: Mutex<Vec<(String, String)>>,
        pub calls: AtomicU64,
        /// Cancel this token when the given item is fetched
        pub cancel_on_fetch: Mutex<Option<(String, CancellationToken)>>,
    }

    impl MemoryContent {
        pub fn with_pages(bodies: &[(&str, &str)]) -> Self {
            let content = Self::default();
            *content.items.lock().unwrap() = bodies
                .iter()
                .map(|(id, body)| ContentItem {
                    kind: ContentKind::Pages,
                    id: id.to_string(),
                    title: format!("Page {id}"),
                    body: body.to_string(),
                    html_url: None,
                })
                .collect();
            content
        }

        pub fn fail(&self, id: &str, error: ContentError) {
            self.failures.lock().unwrap().insert(id.to_string(), error);
        }

        pub fn fail_update(&self, id: &str, error: ContentError) {
            self.update_failures.lock().unwrap().insert(id.to_string(), error);
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentApi for MemoryContent {
        fn list(
            &self,
            kind: ContentKind,
            _course_id: &str,
        ) -> BoxStream<'static, std::result::Result<ContentRef, ContentError>> {
            let refs: Vec<_> = self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.kind == kind)
                .map(|i| Ok(i.as_ref()))
                .collect();
            stream::iter(refs).boxed()
        }

        async fn fetch(
            &self,
            kind: ContentKind,
            _course_id: &str,
            id: &str,
        ) -> std::result::Result<ContentItem, ContentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((target, token)) = self.cancel_on_fetch.lock().unwrap().as_ref()
                && target == id
            {
                token.cancel();
            }
            if let Some(error) = self.failures.lock().unwrap().get(id) {
                return Err(error.clone());
            }
            self.items
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.kind == kind && i.id == id)
                .cloned()
                .ok_or(ContentError::NotFound {
                    resource: format!("{kind}/{id}"),
                })
        }

        async fn update(
            &self,
            kind: ContentKind,
            _course_id: &str,
            id: &str,
            body: &str,
        ) -> std::result::Result<(), ContentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.update_failures.lock().unwrap().get(id) {
                return Err(error.clone());
            }
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.iter_mut().find(|i| i.kind == kind && i.id == id) {
                item.body = body.to_string();
            }
            self.updates.lock().unwrap().push((id.to_string(), body.to_string()));
            Ok(())
        }
    }

    pub fn context(config: TaskConfig, content: Arc<MemoryContent>) -> TaskContext {
        let id = ExecutionId::new();
        TaskContext::new(
            id,
            Arc::new(config),
            content,
            ProgressTracker::start(id, &ProgressConfig::default()),
            CancellationToken::new(),
        )
    }
}
