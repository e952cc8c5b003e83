//! Job execution outcome types.
//!
//! This module defines what a job body returns and what the worker pool reports
//! back to the scheduler after an attempt.

use serde::{Deserialize, Serialize};

use crate::domain::JobStatus;
use crate::error::JobError;

/// Value returned by a successful job body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    /// Result value, recorded in the completion feed
    pub value: serde_json::Value,
    /// Explicit reward for the priority model, overriding the derived one
    pub reward: Option<f64>,
}

impl JobOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value, reward: None }
    }

    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = Some(reward);
        self
    }
}

impl From<serde_json::Value> for JobOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

impl From<()> for JobOutput {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

/// Outcome of one execution attempt, as reported by the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub attempt: u32,
    pub result: std::result::Result<JobOutput, JobError>,
    pub duration_ms: u64,
}

/// Entry in the completion feed and the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub attempt: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    pub duration_ms: u64,
    #[serde(default)]
    pub reward: Option<f64>,
    pub finished_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_output_from_value() {
        let output: JobOutput = json!({"summary": "ok"}).into();
        assert_eq!(output.value, json!({"summary": "ok"}));
        assert!(output.reward.is_none());
    }

    #[test]
    fn test_job_output_with_reward() {
        let output = JobOutput::new(json!(1)).with_reward(0.9);
        assert_eq!(output.reward, Some(0.9));
    }

    #[test]
    fn test_job_output_from_unit() {
        let output: JobOutput = ().into();
        assert_eq!(output.value, serde_json::Value::Null);
    }

    #[test]
    fn test_completion_record_serialization() {
        let record = CompletionRecord {
            job_id: "j1".to_string(),
            name: "noop".to_string(),
            status: JobStatus::Done,
            attempt: 1,
            error: None,
            result: Some(json!(null)),
            duration_ms: 12,
            reward: Some(1.0),
            finished_at: 1_738_300_800_000,
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"status\":\"done\""));
        let parsed: CompletionRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }
}
