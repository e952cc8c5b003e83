//! Error types for jobwright
//!
//! Centralized error handling using thiserror. `SchedulerError` covers the
//! engine itself; `JobError` is what job bodies return and is always caught and
//! classified at the worker pool boundary.

use std::time::Duration;

use thiserror::Error;

use crate::domain::JobStatus;

/// Errors raised by the scheduler, store, and queue.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed submission, rejected before any job is created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Dependencies would form a cycle
    #[error("Dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { job_id: String, path: Vec<String> },

    /// A status change the lifecycle does not allow
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Job not found in the store
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Internal invariant violation; halts the control loop
    #[error("Scheduler fatal error: {0}")]
    Fatal(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for jobwright operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors produced by job bodies, after classification.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    /// Retryable failure (external collaborator unavailable, flaky IO, ...)
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Explicitly non-retryable failure
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The body did not return within its timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No body registered under the job's name
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// The body observed its cancellation flag
    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Shorthand for a transient error without a retry-after hint.
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Shorthand for a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Transient { .. } => true,
            JobError::Timeout(_) => true,
            JobError::Permanent(_) => false,
            JobError::UnknownJobType(_) => false,
            JobError::Cancelled => false,
        }
    }

    /// Minimum delay requested by the error itself, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = SchedulerError::Validation("name must not be empty".to_string());
        assert_eq!(err.to_string(), "Validation error: name must not be empty");
    }

    #[test]
    fn test_dependency_cycle_error() {
        let err = SchedulerError::DependencyCycle {
            job_id: "a".to_string(),
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = SchedulerError::InvalidTransition {
            job_id: "j1".to_string(),
            from: JobStatus::Done,
            to: JobStatus::Running,
        };
        assert_eq!(err.to_string(), "Invalid transition for job j1: done -> running");
    }

    #[test]
    fn test_job_not_found_error() {
        let err = SchedulerError::JobNotFound("j1".to_string());
        assert_eq!(err.to_string(), "Job not found: j1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SchedulerError = io_err.into();
        assert!(matches!(err, SchedulerError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: SchedulerError = json_err.into();
        assert!(matches!(err, SchedulerError::Json(_)));
    }

    #[test]
    fn test_job_error_is_retryable() {
        assert!(JobError::transient("reasoning service down").is_retryable());
        assert!(JobError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!JobError::permanent("bad payload").is_retryable());
        assert!(!JobError::UnknownJobType("nope".to_string()).is_retryable());
        assert!(!JobError::Cancelled.is_retryable());
    }

    #[test]
    fn test_job_error_retry_after() {
        let err = JobError::Transient {
            message: "rate limited".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(JobError::permanent("x").retry_after(), None);
    }
}
