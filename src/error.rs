//! Error types for lms-qa
//!
//! This module provides error handling for the library, including:
//! - Engine-level errors (validation, registry, lifecycle, persistence)
//! - Remote content errors with a per-category recovery policy
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::{ExecutionStatus, FindingKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for lms-qa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lms-qa
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Task configuration failed validation
    #[error("validation failed: {message}")]
    Validation {
        /// Summary message
        message: String,
        /// Individual validation errors, in the order they were found
        errors: Vec<String>,
    },

    /// No task registered under this name
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// A task with this name is already registered
    #[error("task already registered: {0}")]
    DuplicateTask(String),

    /// Task descriptor is malformed (empty name, missing schema, etc.)
    #[error("invalid task descriptor: {0}")]
    InvalidTask(String),

    /// Execution or history record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid in the execution's current state
    #[error("cannot {operation} execution {id}: it is already {current_state}")]
    InvalidState {
        /// Execution the operation targeted
        id: String,
        /// Operation that was attempted (e.g. "cancel")
        operation: String,
        /// Status that prevents the operation
        current_state: ExecutionStatus,
    },

    /// Remote content API error that could not be recovered
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Execution exceeded its hard timeout
    #[error("execution timed out after {seconds} seconds")]
    Timeout {
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// Execution was cancelled by the operator
    #[error("execution cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new executions
    #[error("shutdown in progress: not accepting new executions")]
    ShuttingDown,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "rate_limit.requests_per_minute")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a validation error from a list of messages
    pub fn validation(errors: Vec<String>) -> Self {
        let message = match errors.as_slice() {
            [] => "invalid configuration".to_string(),
            [only] => only.clone(),
            [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
        };
        Error::Validation { message, errors }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., a result was already stored for this execution)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Error returned by the remote content API
///
/// Each variant falls in one category of the recovery policy; see [`ContentError::policy`].
/// Messages are written for operators, not developers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// Temporary failure (5xx, connection reset, timeout)
    #[error("the LMS is temporarily unavailable ({message})")]
    Transient {
        /// HTTP status if a response was received
        status: Option<u16>,
        /// Underlying error
        message: String,
    },

    /// The LMS returned 429
    #[error("the LMS rate limit was exceeded")]
    RateLimited {
        /// Server-provided wait before retrying
        retry_after: Option<Duration>,
    },

    /// Access token rejected (401)
    #[error("your session has expired; generate a new access token and try again")]
    AuthExpired,

    /// No permission for this item (403)
    #[error("permission denied for {resource}; the token's user cannot edit this item")]
    Forbidden {
        /// Resource path that was denied
        resource: String,
    },

    /// Item no longer exists (404)
    #[error("{resource} was not found; it may have been deleted")]
    NotFound {
        /// Resource path that was missing
        resource: String,
    },

    /// Response body could not be understood
    #[error("the LMS returned malformed data: {message}")]
    Data {
        /// Parse failure description
        message: String,
    },

    /// Any other failure that cannot be retried
    #[error("the LMS request failed ({message})")]
    Fatal {
        /// HTTP status if a response was received
        status: Option<u16>,
        /// Underlying error
        message: String,
    },
}

/// What the caller should do after a [`ContentError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Back off and retry the same request
    Retry,
    /// Wait for the rate limit window, then retry without consuming retry budget
    WaitForWindow,
    /// Stop the whole execution
    AbortExecution,
    /// Record a finding of this type and continue with the next item
    SkipItem(FindingKind),
}

impl ContentError {
    /// Recovery policy for this error
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            ContentError::Transient { .. } => ErrorPolicy::Retry,
            ContentError::RateLimited { .. } => ErrorPolicy::WaitForWindow,
            ContentError::AuthExpired | ContentError::Fatal { .. } => ErrorPolicy::AbortExecution,
            ContentError::Forbidden { .. } | ContentError::Data { .. } => {
                ErrorPolicy::SkipItem(FindingKind::Error)
            }
            ContentError::NotFound { .. } => ErrorPolicy::SkipItem(FindingKind::Info),
        }
    }

    /// HTTP status that produced this error, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ContentError::Transient { status, .. } | ContentError::Fatal { status, .. } => *status,
            ContentError::RateLimited { .. } => Some(429),
            ContentError::AuthExpired => Some(401),
            ContentError::Forbidden { .. } => Some(403),
            ContentError::NotFound { .. } => Some(404),
            ContentError::Data { .. } => None,
        }
    }
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "validation_error",
///     "message": "validation failed: mapping 1: find must not be empty",
///     "details": {
///       "errors": ["mapping 1: find must not be empty"]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Validation { .. } => 400,
            Error::Config { .. } => 400,
            Error::InvalidTask(_) => 400,

            // 404 Not Found
            Error::UnknownTask(_) => 404,
            Error::NotFound(_) => 404,

            // 409 Conflict
            Error::DuplicateTask(_) => 409,
            Error::InvalidState { .. } => 409,
            Error::Cancelled => 409,

            // 502 Bad Gateway - remote LMS errors
            Error::Content(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,

            // 504 Gateway Timeout
            Error::Timeout { .. } => 504,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation { .. } => "validation_error",
            Error::UnknownTask(_) => "unknown_task",
            Error::DuplicateTask(_) => "duplicate_task",
            Error::InvalidTask(_) => "invalid_task",
            Error::NotFound(_) => "not_found",
            Error::InvalidState { .. } => "invalid_state",
            Error::Content(e) => match e {
                ContentError::Transient { .. } => "lms_unavailable",
                ContentError::RateLimited { .. } => "lms_rate_limited",
                ContentError::AuthExpired => "lms_auth_expired",
                ContentError::Forbidden { .. } => "lms_forbidden",
                ContentError::NotFound { .. } => "lms_not_found",
                ContentError::Data { .. } => "lms_bad_data",
                ContentError::Fatal { .. } => "lms_error",
            },
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Validation { errors, .. } => Some(serde_json::json!({
                "errors": errors,
            })),
            Error::InvalidState {
                id,
                operation,
                current_state,
            } => Some(serde_json::json!({
                "execution_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Content(e) => e.status().map(|status| {
                serde_json::json!({
                    "upstream_status": status,
                })
            }),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
