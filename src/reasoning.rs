//! External reasoning collaborator.
//!
//! Job bodies that need the agent's reasoning service call it through
//! [`ReasoningClient`]. Its errors convert into [`JobError`] so a body can
//! simply use `?`: an unavailable or slow service is retried, a malformed
//! response is not.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::JobError;

/// Failures of the reasoning service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReasoningError {
    /// Service unreachable or overloaded
    #[error("reasoning service unavailable: {message}")]
    Unavailable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered but the response could not be used
    #[error("reasoning integration error: {0}")]
    Integration(String),
}

impl From<ReasoningError> for JobError {
    fn from(err: ReasoningError) -> Self {
        match err {
            ReasoningError::Unavailable { message, retry_after } => JobError::Transient {
                message: format!("reasoning service unavailable: {}", message),
                retry_after,
            },
            ReasoningError::Timeout(d) => JobError::Transient {
                message: format!("reasoning call timed out after {:?}", d),
                retry_after: None,
            },
            ReasoningError::Integration(msg) => JobError::Permanent(format!("reasoning integration error: {}", msg)),
        }
    }
}

/// Client for the reasoning service.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Invoke the capability named by `spec_key` with `payload`.
    async fn call(&self, spec_key: &str, payload: serde_json::Value) -> Result<serde_json::Value, ReasoningError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Scripted(Result<serde_json::Value, ReasoningError>);

    #[async_trait]
    impl ReasoningClient for Scripted {
        async fn call(&self, _spec_key: &str, _payload: serde_json::Value) -> Result<serde_json::Value, ReasoningError> {
            self.0.clone()
        }
    }

    async fn body(client: &dyn ReasoningClient) -> Result<serde_json::Value, JobError> {
        let answer = client.call("summarize", json!({"window": 5})).await?;
        Ok(answer)
    }

    #[test]
    fn test_unavailable_is_transient() {
        let err: JobError = ReasoningError::Unavailable {
            message: "503".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_timeout_is_transient() {
        let err: JobError = ReasoningError::Timeout(Duration::from_secs(30)).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_integration_is_permanent() {
        let err: JobError = ReasoningError::Integration("missing field 'answer'".to_string()).into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("missing field"));
    }

    #[tokio::test]
    async fn test_question_mark_in_body() {
        let ok = Scripted(Ok(json!("short summary")));
        assert_eq!(body(&ok).await.unwrap(), json!("short summary"));

        let down = Scripted(Err(ReasoningError::Unavailable {
            message: "connection refused".to_string(),
            retry_after: None,
        }));
        assert!(body(&down).await.unwrap_err().is_retryable());
    }
}
