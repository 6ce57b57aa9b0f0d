//! Execution engine split into focused submodules.
//!
//! The [`ExecutionEngine`] struct and its methods are organized by domain:
//! - [`control`] - Submission, status, cancellation and results
//! - [`queue_processor`] - FIFO queue draining under the concurrency ceiling
//! - [`run`] - Running one execution under its timeout and finalizing it
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod lifecycle;
mod queue_processor;
mod run;


use crate::client::{ContentApi, ContentClient};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::progress::ProgressTracker;
use crate::rate_limiter::RateLimiter;
use crate::registry::{TaskDescriptor, TaskRegistry};
use crate::retry::CallCounters;
use crate::types::{Execution, ExecutionId, ExecutionStats, QAResult, TaskConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where executions get their content from
#[derive(Clone)]
pub enum ContentSource {
    /// The real LMS; each execution gets a handle with its own call counters
    Client(ContentClient),
    /// Any other implementation, shared by all executions
    Custom(Arc<dyn ContentApi>),
}

impl std::fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::Client(client) => f.debug_tuple("Client").field(client).finish(),
            ContentSource::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl ContentSource {
    /// Content handle and call counters for one execution
    fn for_execution(&self) -> (Arc<dyn ContentApi>, Option<Arc<CallCounters>>) {
        match self {
            ContentSource::Client(client) => {
                let scoped = client.scoped();
                let counters = scoped.counters();
                (Arc::new(scoped), Some(counters))
            }
            ContentSource::Custom(content) => (Arc::clone(content), None),
        }
    }
}

/// Engine-side state of one execution
pub(crate) struct ExecutionRecord {
    /// Snapshot returned by status queries (status fields owned by the engine)
    pub(crate) execution: Execution,
    pub(crate) config: Arc<TaskConfig>,
    pub(crate) descriptor: Arc<TaskDescriptor>,
    pub(crate) tracker: Arc<ProgressTracker>,
    pub(crate) cancel_token: CancellationToken,
    /// Content handle scoped to this execution
    pub(crate) content: Arc<dyn ContentApi>,
    /// Request counters, when the content source keeps them
    pub(crate) counters: Option<Arc<CallCounters>>,
    /// When the task started running
    pub(crate) started: Option<Instant>,
    /// Set exactly once, on the terminal transition
    pub(crate) result: watch::Sender<Option<Arc<QAResult>>>,
}

impl ExecutionRecord {
    /// Statistics from the tracker plus engine-owned counters
    pub(crate) fn live_stats(&self) -> ExecutionStats {
        let mut stats = self.tracker.stats();
        if let Some(counters) = &self.counters {
            stats.api_calls = counters.api_calls();
            stats.rate_limit_waits = counters.rate_limit_waits();
        }
        if let Some(started) = self.started {
            stats.elapsed = started.elapsed();
        }
        stats
    }

    /// Status snapshot; live counters while the execution is active
    pub(crate) fn snapshot(&self) -> Execution {
        let mut execution = self.execution.clone();
        if !execution.status.is_terminal() {
            execution.stats = self.live_stats();
            if let Some(update) = self.tracker.latest() {
                execution.progress = update.percentage;
            }
        }
        execution
    }
}

/// Queue and execution state management
#[derive(Clone)]
pub(crate) struct EngineState {
    /// Active executions plus recently finished ones
    pub(crate) executions: Arc<Mutex<HashMap<ExecutionId, ExecutionRecord>>>,
    /// Persisted finished executions still in `executions`, oldest first
    ///
    /// Only locked while `executions` is held.
    pub(crate) retired: Arc<Mutex<VecDeque<ExecutionId>>>,
    /// FIFO of executions waiting for a worker
    pub(crate) queue_tx: mpsc::UnboundedSender<ExecutionId>,
    /// Limits concurrently running executions
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// False once shutdown begins
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the queue processor
    pub(crate) shutdown_token: CancellationToken,
}

/// Runs tasks against course content under a concurrency ceiling
///
/// Cloning is cheap; all clones share the same executions, queue and limiter.
///
/// # Examples
///
/// ```no_run
/// use lms_qa::{Config, ExecutionEngine, TaskConfig, UrlMapping};
///
/// # async fn example() -> lms_qa::Result<()> {
/// let engine = ExecutionEngine::new(Config::default()).await?;
///
/// let config = TaskConfig::new("find_replace", "12345")
///     .with_mappings(vec![UrlMapping::new("http://old.edu", "https://new.edu")]);
/// let id = engine.start(config).await?;
///
/// let result = engine.wait(id).await?;
/// println!("{} findings", result.findings.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ExecutionEngine {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) content: ContentSource,
    pub(crate) limiter: RateLimiter,
    pub(crate) db: Option<Arc<Database>>,
    pub(crate) state: EngineState,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("content", &self.content)
            .field("persistent", &self.db.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Create an engine with the built-in tasks, the LMS client and the result store
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Opens/creates the SQLite result store
    /// - Builds the shared rate limiter and content client
    /// - Starts the queue processor
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(TaskRegistry::with_builtin_tasks()?);
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let limiter = RateLimiter::new(&config.rate_limit);
        let client = ContentClient::new(
            &config.canvas,
            config.retry.clone(),
            &config.rate_limit,
            limiter,
        )?;

        Ok(Self::with_parts(config, registry, ContentSource::Client(client), Some(db)))
    }

    /// Create an engine from explicit parts
    ///
    /// Must be called from within a Tokio runtime. Pass `None` for `db` to keep
    /// results in memory only.
    pub fn with_parts(
        config: Config,
        registry: Arc<TaskRegistry>,
        content: ContentSource,
        db: Option<Arc<Database>>,
    ) -> Self {
        let limiter = match &content {
            ContentSource::Client(client) => client.limiter().clone(),
            ContentSource::Custom(_) => RateLimiter::new(&config.rate_limit),
        };

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let state = EngineState {
            executions: Arc::new(Mutex::new(HashMap::new())),
            retired: Arc::new(Mutex::new(VecDeque::new())),
            queue_tx,
            concurrent_limit: Arc::new(Semaphore::new(
                config.engine.max_concurrent_executions.max(1),
            )),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
        };

        let engine = Self {
            config: Arc::new(config),
            registry,
            content,
            limiter,
            db,
            state,
        };
        engine.start_queue_processor(queue_rx);
        engine
    }

    /// The task catalog
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// The result store, if one is attached
    pub fn database(&self) -> Option<&Arc<Database>> {
        self.db.as_ref()
    }

    /// The engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
