//! Core types for lms-qa

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for an execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new random ExecutionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Execution status
///
/// Transitions are one-directional:
/// `pending -> running -> {completed, failed}` and `{pending, running} -> cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted and waiting for a worker slot
    Pending,
    /// Task body is running
    Running,
    /// Task finished all items
    Completed,
    /// Task aborted on a fatal error or timeout
    Failed,
    /// Cancelled by the operator
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status ends the execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Execution accepted, task not yet started
    Initializing,
    /// Checking configuration and permissions
    Validating,
    /// Listing content from the remote API
    FetchingContent,
    /// Rewriting content items
    Processing,
    /// Assembling the final result
    GeneratingResults,
    /// Terminal stage
    Completed,
}

impl Stage {
    /// Snake-case name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Validating => "validating",
            Stage::FetchingContent => "fetching_content",
            Stage::Processing => "processing",
            Stage::GeneratingResults => "generating_results",
            Stage::Completed => "completed",
        }
    }
}

/// Severity of a progress update
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine progress
    #[default]
    Info,
    /// Something was skipped
    Warning,
    /// Something failed
    Error,
    /// Terminal success
    Success,
}

/// Type of a finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    /// A value was rewritten in the remote content
    Replaced,
    /// A value matched but was not rewritten (preview mode)
    Found,
    /// An item could not be processed
    Error,
    /// Non-fatal anomaly
    Warning,
    /// Informational observation
    Info,
}

impl FindingKind {
    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Replaced => "replaced",
            FindingKind::Found => "found",
            FindingKind::Error => "error",
            FindingKind::Warning => "warning",
            FindingKind::Info => "info",
        }
    }
}

/// Kind of LMS content carrying an HTML body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Course syllabus (one per course)
    Syllabus,
    /// Wiki pages
    Pages,
    /// Assignments
    Assignments,
    /// Classic quizzes
    Quizzes,
    /// Discussion topics
    Discussions,
    /// Announcements (discussion topics flagged as announcements)
    Announcements,
}

impl ContentKind {
    /// Every supported kind, in scan order
    pub const ALL: [ContentKind; 6] = [
        ContentKind::Syllabus,
        ContentKind::Pages,
        ContentKind::Assignments,
        ContentKind::Quizzes,
        ContentKind::Discussions,
        ContentKind::Announcements,
    ];

    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Syllabus => "syllabus",
            ContentKind::Pages => "pages",
            ContentKind::Assignments => "assignments",
            ContentKind::Quizzes => "quizzes",
            ContentKind::Discussions => "discussions",
            ContentKind::Announcements => "announcements",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn all_content_kinds() -> Vec<ContentKind> {
    ContentKind::ALL.to_vec()
}

/// Reference to one content item, as returned by listing endpoints
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContentRef {
    /// Kind of content
    pub kind: ContentKind,
    /// Remote identifier (numeric id, or page slug for pages)
    pub id: String,
    /// Display title
    pub title: String,
}

/// A fetched content item with its HTML body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContentItem {
    /// Kind of content
    pub kind: ContentKind,
    /// Remote identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// HTML body (empty when the item has none)
    pub body: String,
    /// Link to the item in the LMS web UI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

impl ContentItem {
    /// Reference to this item
    pub fn as_ref(&self) -> ContentRef {
        ContentRef {
            kind: self.kind,
            id: self.id.clone(),
            title: self.title.clone(),
        }
    }
}

/// One find/replace rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct UrlMapping {
    /// Literal text to search for (must be non-empty)
    pub find: String,
    /// Replacement text
    pub replace: String,
    /// Optional operator note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UrlMapping {
    /// Create a mapping without a description
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
            description: None,
        }
    }

    /// The mapping with `find` and `replace` swapped
    pub fn inverse(&self) -> Self {
        Self {
            find: self.replace.clone(),
            replace: self.find.clone(),
            description: self.description.clone(),
        }
    }
}

/// Matching options for find/replace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct RewriteOptions {
    /// Match case exactly (default: false)
    #[serde(default)]
    pub case_sensitive: bool,
    /// Only match when not embedded in a larger word (default: false)
    #[serde(default)]
    pub whole_word: bool,
    /// Detect matches without writing anything (default: false)
    #[serde(default)]
    pub preview_mode: bool,
}

/// Configuration submitted to start an execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct TaskConfig {
    /// Registered task name (e.g. "find_replace")
    pub task_name: String,
    /// Course whose content is scanned
    pub course_id: String,
    /// Ordered find/replace rules
    #[serde(default)]
    pub mappings: Vec<UrlMapping>,
    /// Matching options
    #[serde(default)]
    pub options: RewriteOptions,
    /// Content kinds to scan (default: all)
    #[serde(default = "all_content_kinds")]
    pub content_types: Vec<ContentKind>,
    /// Hard timeout for the execution (default from engine config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl TaskConfig {
    /// Create a config scanning every content kind with default options
    pub fn new(task_name: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            course_id: course_id.into(),
            mappings: Vec::new(),
            options: RewriteOptions::default(),
            content_types: all_content_kinds(),
            timeout_seconds: None,
        }
    }

    /// Builder-style mapping setter
    pub fn with_mappings(mut self, mappings: Vec<UrlMapping>) -> Self {
        self.mappings = mappings;
        self
    }

    /// Builder-style options setter
    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder-style content kind setter
    pub fn with_content_types(mut self, kinds: Vec<ContentKind>) -> Self {
        self.content_types = kinds;
        self
    }
}

/// Result of validating a [`TaskConfig`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationResult {
    /// Problems that prevent execution
    pub errors: Vec<String>,
    /// Problems worth showing the operator
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// True when there are no errors
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record an error
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Record a warning
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Counters accumulated over an execution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExecutionStats {
    /// Content items fully processed
    pub items_processed: u64,
    /// Occurrences matched (replaced or previewed)
    pub items_found: u64,
    /// Occurrences rewritten in the remote content
    pub items_replaced: u64,
    /// Items skipped due to errors
    pub errors: u64,
    /// Remote API calls issued (including retries)
    pub api_calls: u64,
    /// Times the rate limiter made the task wait
    pub rate_limit_waits: u64,
    /// Wall time since the execution started
    #[serde(with = "duration_secs_f64")]
    #[schema(value_type = f64)]
    pub elapsed: Duration,
    /// Finding counts keyed by finding type
    pub findings_by_type: BTreeMap<String, u64>,
    /// Processed item counts keyed by content kind
    pub items_by_kind: BTreeMap<String, u64>,
}

/// Snapshot of one execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Execution {
    /// Execution identifier
    pub id: ExecutionId,
    /// Task that runs in this execution
    pub task_name: String,
    /// Current status
    pub status: ExecutionStatus,
    /// When the execution was accepted
    pub created_at: DateTime<Utc>,
    /// When the task body started
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress percentage (0.0 to 100.0)
    pub progress: f32,
    /// Current counters
    pub stats: ExecutionStats,
    /// Summary error for failed executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress update published while an execution runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressUpdate {
    /// Execution this update belongs to
    pub execution_id: ExecutionId,
    /// Current stage
    pub stage: Stage,
    /// Items done in the current stage
    pub current: u64,
    /// Items expected in the current stage
    pub total: u64,
    /// `current / total` as a percentage
    pub percentage: f32,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Severity
    pub severity: Severity,
    /// Minute-window tokens left in the shared rate limiter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    /// Emission time (non-decreasing per execution)
    pub timestamp: DateTime<Utc>,
}

/// One observation made during an execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Finding {
    /// Finding type
    #[serde(rename = "type")]
    pub kind: FindingKind,
    /// Kind of content the finding is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentKind>,
    /// Remote id of the content item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Title of the content item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_title: Option<String>,
    /// Matched text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    /// Text written in place of the match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Finding {
    /// Finding about a specific content item
    pub fn for_item(kind: FindingKind, item: &ContentRef) -> Self {
        Self {
            kind,
            content_type: Some(item.kind),
            content_id: Some(item.id.clone()),
            content_title: Some(item.title.clone()),
            original_value: None,
            new_value: None,
            description: None,
        }
    }

    /// Finding about the execution as a whole
    pub fn execution_level(kind: FindingKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            content_type: None,
            content_id: None,
            content_title: None,
            original_value: None,
            new_value: None,
            description: Some(description.into()),
        }
    }

    /// Builder-style value setter
    pub fn with_values(mut self, original: impl Into<String>, new: Option<String>) -> Self {
        self.original_value = Some(original.into());
        self.new_value = new;
        self
    }

    /// Builder-style description setter
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Terminal record of an execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QAResult {
    /// Execution identifier
    pub execution_id: ExecutionId,
    /// Task that ran
    pub task_name: String,
    /// Terminal status
    pub status: ExecutionStatus,
    /// When the task body started (absent if cancelled while pending)
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution was finalized
    pub completed_at: DateTime<Utc>,
    /// Counters at finalization
    pub stats: ExecutionStats,
    /// Findings in the order they were recorded
    pub findings: Vec<Finding>,
    /// Summary error for failed executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QAResult {
    /// Findings of the given type
    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }
}

impl From<&QAResult> for Execution {
    /// Snapshot of a finished execution rebuilt from its stored result
    fn from(result: &QAResult) -> Self {
        Self {
            id: result.execution_id,
            task_name: result.task_name.clone(),
            status: result.status,
            created_at: result.started_at.unwrap_or(result.completed_at),
            started_at: result.started_at,
            completed_at: Some(result.completed_at),
            progress: if result.status == ExecutionStatus::Completed {
                100.0
            } else {
                0.0
            },
            stats: result.stats.clone(),
            error: result.error.clone(),
        }
    }
}

/// Summary of one history record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    /// Execution identifier
    pub execution_id: ExecutionId,
    /// Task that ran
    pub task_name: String,
    /// Terminal status
    pub status: ExecutionStatus,
    /// Number of findings in the stored result
    pub findings: u64,
    /// When the execution was finalized
    pub completed_at: DateTime<Utc>,
}

// Duration serialization helper (fractional seconds)
mod duration_secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}
