//! Application state for the API server

use crate::{Config, ExecutionEngine};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request. The engine is itself a cheap handle over shared state.
#[derive(Clone)]
pub struct AppState {
    /// The execution engine
    pub engine: ExecutionEngine,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: ExecutionEngine, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
