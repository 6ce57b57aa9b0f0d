//! Catalog of runnable task types
//!
//! Tasks are registered explicitly at startup ([`TaskRegistry::with_builtin_tasks`])
//! or through [`TaskRegistry::register`]. A registry holds at most one
//! descriptor per name and lists them in registration order.

use crate::error::{Error, Result};
use crate::tasks::TaskContext;
use crate::types::{ContentKind, TaskConfig, ValidationResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use utoipa::ToSchema;

/// A runnable task type
///
/// Implementations validate their own configuration and describe it with a
/// JSON schema. [`execute`](Task::execute) runs the task body; the engine owns
/// status, timeout and result assembly.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use lms_qa::registry::Task;
/// use lms_qa::tasks::TaskContext;
/// use lms_qa::types::{TaskConfig, ValidationResult};
///
/// struct Noop;
///
/// #[async_trait]
/// impl Task for Noop {
///     fn validate_config(&self, _config: &TaskConfig) -> ValidationResult {
///         ValidationResult::default()
///     }
///
///     fn config_schema(&self) -> serde_json::Value {
///         serde_json::json!({ "type": "object" })
///     }
///
///     async fn execute(&self, _ctx: &TaskContext) -> lms_qa::Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Check a configuration before an execution is created
    fn validate_config(&self, config: &TaskConfig) -> ValidationResult;

    /// JSON schema describing the accepted configuration
    fn config_schema(&self) -> serde_json::Value;

    /// Run the task body
    ///
    /// Returns [`Error::Cancelled`] when the context's cancellation token fires.
    /// Any other error fails the execution.
    async fn execute(&self, ctx: &TaskContext) -> Result<()>;
}

/// Constructor for task instances
pub type TaskFactory = Arc<dyn Fn() -> Arc<dyn Task> + Send + Sync>;

/// Registered metadata and factory for a task type
#[derive(Clone)]
pub struct TaskDescriptor {
    /// Unique key (lowercase letters, digits, underscores)
    pub name: String,
    /// Name shown to operators
    pub display_name: String,
    /// One-paragraph summary
    pub description: String,
    /// Task version
    pub version: String,
    /// LMS permissions the access token needs
    pub required_permissions: Vec<String>,
    /// Content kinds the task can scan
    pub supported_kinds: Vec<ContentKind>,
    /// JSON schema of the task configuration
    pub config_schema: serde_json::Value,
    /// Longer usage notes
    pub help_text: String,
    /// Example configurations
    pub examples: Vec<serde_json::Value>,
    /// Builds a task instance per execution
    pub factory: TaskFactory,
}

impl std::fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("supported_kinds", &self.supported_kinds)
            .finish_non_exhaustive()
    }
}

impl TaskDescriptor {
    /// Create a descriptor; the schema is taken from a task instance
    pub fn new<F>(name: impl Into<String>, version: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Task> + Send + Sync + 'static,
    {
        let name = name.into();
        let config_schema = factory().config_schema();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            version: version.into(),
            required_permissions: Vec::new(),
            supported_kinds: ContentKind::ALL.to_vec(),
            config_schema,
            help_text: String::new(),
            examples: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Builder-style display name setter
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Builder-style description setter
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style permission list setter
    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.required_permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Builder-style content kind setter
    pub fn with_supported_kinds(mut self, kinds: Vec<ContentKind>) -> Self {
        self.supported_kinds = kinds;
        self
    }

    /// Builder-style help text setter
    pub fn with_help_text(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = help_text.into();
        self
    }

    /// Builder-style example setter
    pub fn with_example(mut self, example: serde_json::Value) -> Self {
        self.examples.push(example);
        self
    }

    /// Build a fresh task instance
    pub fn instantiate(&self) -> Arc<dyn Task> {
        (self.factory)()
    }

    /// Serializable view for discovery endpoints
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            required_permissions: self.required_permissions.clone(),
            supported_kinds: self.supported_kinds.clone(),
            config_schema: self.config_schema.clone(),
            help_text: self.help_text.clone(),
            examples: self.examples.clone(),
        }
    }

    fn check(&self) -> Result<()> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_name {
            return Err(Error::InvalidTask(format!(
                "task name '{}' must be non-empty lowercase letters, digits or underscores",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(Error::InvalidTask(format!("task '{}' has no version", self.name)));
        }
        if !self.config_schema.is_object() {
            return Err(Error::InvalidTask(format!(
                "task '{}' config schema must be a JSON object",
                self.name
            )));
        }
        if self.supported_kinds.is_empty() {
            return Err(Error::InvalidTask(format!(
                "task '{}' supports no content kinds",
                self.name
            )));
        }
        Ok(())
    }
}

/// Task metadata as returned by the API
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct TaskInfo {
    /// Unique key
    pub name: String,
    /// Name shown to operators
    pub display_name: String,
    /// One-paragraph summary
    pub description: String,
    /// Task version
    pub version: String,
    /// LMS permissions the access token needs
    pub required_permissions: Vec<String>,
    /// Content kinds the task can scan
    pub supported_kinds: Vec<ContentKind>,
    /// JSON schema of the task configuration
    #[schema(value_type = Object)]
    pub config_schema: serde_json::Value,
    /// Longer usage notes
    pub help_text: String,
    /// Example configurations
    #[schema(value_type = Vec<Object>)]
    pub examples: Vec<serde_json::Value>,
}

/// In-memory task catalog
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<Vec<Arc<TaskDescriptor>>>,
}

impl TaskRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in task
    pub fn with_builtin_tasks() -> Result<Self> {
        let registry = Self::new();
        for descriptor in crate::tasks::builtin_descriptors() {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Add a task type
    ///
    /// Fails with [`Error::DuplicateTask`] if the name is taken and
    /// [`Error::InvalidTask`] if the descriptor is malformed.
    pub fn register(&self, descriptor: TaskDescriptor) -> Result<()> {
        descriptor.check()?;

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.iter().any(|t| t.name == descriptor.name) {
            return Err(Error::DuplicateTask(descriptor.name));
        }

        tracing::info!(task = %descriptor.name, version = %descriptor.version, "Registered task");
        tasks.push(Arc::new(descriptor));
        Ok(())
    }

    /// Look up a task type by name
    pub fn resolve(&self, name: &str) -> Result<Arc<TaskDescriptor>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    /// All task types, in registration order
    pub fn list(&self) -> Vec<Arc<TaskDescriptor>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove a task type; running executions keep their instance
    pub fn unregister(&self, name: &str) -> Result<Arc<TaskDescriptor>> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let index = tasks
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))?;
        Ok(tasks.remove(index))
    }

    /// Replace the whole catalog
    ///
    /// Every descriptor is checked first; on error the catalog is unchanged.
    pub fn reload(&self, descriptors: Vec<TaskDescriptor>) -> Result<()> {
        let mut fresh: Vec<Arc<TaskDescriptor>> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            descriptor.check()?;
            if fresh.iter().any(|t| t.name == descriptor.name) {
                return Err(Error::DuplicateTask(descriptor.name));
            }
            fresh.push(Arc::new(descriptor));
        }

        let count = fresh.len();
        *self.tasks.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::info!(count, "Reloaded task registry");
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Stub;

    #[async_trait]
    impl Task for Stub {
        fn validate_config(&self, _config: &TaskConfig) -> ValidationResult {
            ValidationResult::default()
        }

        fn config_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }

        async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
            Ok(())
        }
    }

    fn stub(name: &str) -> TaskDescriptor {
        TaskDescriptor::new(name, "1.0.0", || Arc::new(Stub) as Arc<dyn Task>)
    }

    #[test]
    fn register_and_resolve() {
        let registry = TaskRegistry::new();
        registry.register(stub("alpha")).unwrap();

        let descriptor = registry.resolve("alpha").unwrap();
        assert_eq!(descriptor.name, "alpha");
        assert_eq!(descriptor.config_schema, json!({ "type": "object" }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = TaskRegistry::new();
        registry.register(stub("alpha")).unwrap();

        let err = registry.register(stub("alpha")).unwrap_err();
        assert!(matches!(err, Error::DuplicateTask(name) if name == "alpha"));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn unknown_names_are_reported() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(Error::UnknownTask(name)) if name == "missing"
        ));
    }

    #[test]
    fn list_preserves_registration_order() {
        let registry = TaskRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(stub(name)).unwrap();
        }

        let names: Vec<String> = registry.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let registry = TaskRegistry::new();

        assert!(matches!(registry.register(stub("")), Err(Error::InvalidTask(_))));
        assert!(matches!(registry.register(stub("Bad Name")), Err(Error::InvalidTask(_))));

        let mut no_schema = stub("no_schema");
        no_schema.config_schema = json!("not an object");
        assert!(matches!(registry.register(no_schema), Err(Error::InvalidTask(_))));
    }

    #[test]
    fn reload_is_all_or_nothing() {
        let registry = TaskRegistry::new();
        registry.register(stub("old")).unwrap();

        let err = registry.reload(vec![stub("a"), stub("a")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateTask(_)));
        assert!(registry.resolve("old").is_ok());

        registry.reload(vec![stub("a"), stub("b")]).unwrap();
        assert!(registry.resolve("old").is_err());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn unregister_removes_task() {
        let registry = TaskRegistry::new();
        registry.register(stub("alpha")).unwrap();
        registry.unregister("alpha").unwrap();
        assert!(registry.list().is_empty());
        assert!(registry.unregister("alpha").is_err());
    }

    #[test]
    fn builtin_tasks_are_registered() {
        let registry = TaskRegistry::with_builtin_tasks().unwrap();
        let names: Vec<String> = registry.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["find_replace", "url_inventory"]);

        let info = registry.resolve("find_replace").unwrap().info();
        assert!(info.required_permissions.contains(&"manage_course_content_edit".to_string()));
        assert!(!info.examples.is_empty());
    }
}
