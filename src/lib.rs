//! # lms-qa
//!
//! Bulk content QA for an LMS course: find/replace of URLs and other literal
//! strings across pages, assignments, discussions and other content, run as
//! concurrency-bounded, rate-limited, cancellable executions with live progress.
//!
//! ## Design Philosophy
//!
//! lms-qa is designed to be:
//! - **Structure-preserving** - Rewrites only link targets, resource sources and text, never markup
//! - **Polite to the LMS** - Every call goes through a shared per-minute and per-hour limiter
//! - **Pluggable** - Tasks are registered by name and discovered at runtime
//! - **Observable** - Consumers subscribe to progress streams, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use lms_qa::{Config, ExecutionEngine, TaskConfig, UrlMapping};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.canvas.base_url = "https://canvas.example.edu".to_string();
//!     config.canvas.access_token = "token".to_string();
//!
//!     let engine = ExecutionEngine::new(config).await?;
//!
//!     let task = TaskConfig::new("find_replace", "1234").with_mappings(vec![
//!         UrlMapping::new("http://old.example.edu", "https://new.example.edu"),
//!     ]);
//!     let id = engine.start(task).await?;
//!
//!     // Follow progress
//!     let mut updates = engine.subscribe(id).await?;
//!     use futures::StreamExt;
//!     while let Some(update) = updates.next().await {
//!         println!("{:?} {:.0}%", update.stage, update.percentage);
//!     }
//!
//!     let result = engine.result(id).await?;
//!     println!("{} findings", result.findings.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Mapping remote failures to error categories
pub mod classify;
/// Rate-limited, retrying LMS content client
pub mod client;
/// Configuration types
pub mod config;
/// Result store
pub mod db;
/// Execution engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Markup tokenizer and rewrite targets
pub mod html;
/// Throttled progress broadcasting
pub mod progress;
/// Shared two-window rate limiter
pub mod rate_limiter;
/// Task abstraction and catalog
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Structure-preserving find/replace
pub mod rewriter;
/// Built-in tasks
pub mod tasks;
/// Core types
pub mod types;

// Re-export commonly used types
pub use client::{ContentApi, ContentClient};
pub use config::Config;
pub use db::Database;
pub use engine::{ContentSource, ExecutionEngine};
pub use error::{
    ApiError, ContentError, DatabaseError, Error, ErrorDetail, ErrorPolicy, Result, ToHttpStatus,
};
pub use progress::ProgressTracker;
pub use rate_limiter::{RateLimitState, RateLimiter};
pub use registry::{Task, TaskDescriptor, TaskInfo, TaskRegistry};
pub use rewriter::{Rewrite, Rewriter};
pub use tasks::TaskContext;
pub use types::{
    ContentItem, ContentKind, ContentRef, Execution, ExecutionId, ExecutionStats,
    ExecutionStatus, Finding, FindingKind, HistoryEntry, ProgressUpdate, QAResult,
    RewriteOptions, Severity, Stage, TaskConfig, UrlMapping, ValidationResult,
};

/// Run the engine until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use lms_qa::{Config, ExecutionEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = ExecutionEngine::new(Config::default()).await?;
///
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: ExecutionEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
