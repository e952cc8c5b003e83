//! Job record and related types
//!
//! A Job is a unit of schedulable work: a registered body name, an opaque JSON
//! payload, and a lifecycle status that only moves forward.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::{duration_ms_u64, now_ms};

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Waiting on unmet dependencies
    Pending,
    /// Dependencies satisfied, enqueued for dispatch
    Ready,
    /// Dispatched to a worker
    Running,
    /// Completed successfully
    Done,
    /// Failed, waiting out its backoff before returning to ready
    FailedTransient,
    /// Failed with no retries left, or failed permanently
    FailedTerminal,
    /// Cancelled before completion
    Cancelled,
}

impl JobStatus {
    /// Returns true if no further transitions are permitted
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::FailedTerminal | JobStatus::Cancelled)
    }

    /// Returns true if the job is neither running nor finished
    pub fn is_waiting(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Ready | JobStatus::FailedTransient)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (Pending, Ready) => true,
            (Ready, Running) => true,
            (Running, Done) | (Running, FailedTransient) | (Running, FailedTerminal) => true,
            (FailedTransient, Ready) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::FailedTransient => "failed-transient",
            JobStatus::FailedTerminal => "failed-terminal",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "ready" => Ok(JobStatus::Ready),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed-transient" => Ok(JobStatus::FailedTransient),
            "failed-terminal" | "failed" => Ok(JobStatus::FailedTerminal),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Execution lane of a job
///
/// Background jobs share the mode-derived budget. Interactive jobs have their
/// own slots and are not throttled by the mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lane {
    Interactive,
    #[default]
    Background,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Interactive => "interactive",
            Lane::Background => "background",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Lane::Interactive),
            "background" => Ok(Lane::Background),
            other => Err(format!("unknown lane: {}", other)),
        }
    }
}

/// One recorded status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: i64,
}

/// The job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    //=== Identity ===
    /// Unique identifier, never reused
    pub id: String,

    /// Registered body name
    pub name: String,

    /// Opaque arguments for the body
    pub payload: serde_json::Value,

    /// Optional dedupe key; a live job with the same key absorbs resubmissions
    #[serde(default)]
    pub key: Option<String>,

    //=== Scheduling ===
    /// Effective priority in [0, 1]
    pub priority: f64,

    /// Submitter's hint in [0, 1]
    pub priority_hint: f64,

    /// Jobs that must be done before this one becomes ready
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Sequence number of the latest enqueue
    #[serde(default)]
    pub enqueue_seq: Option<u64>,

    /// Per-job execution timeout (falls back to the worker default)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub lane: Lane,

    /// Submitted as urgent; always runs in the interactive lane
    #[serde(default)]
    pub urgent: bool,

    //=== Runtime State ===
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,

    /// Value returned by the successful attempt
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// When a transiently failed job may return to ready
    #[serde(default)]
    pub retry_at: Option<i64>,

    /// Progress reported by the body, 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    //=== Timestamps ===
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,

    /// Every status change, oldest first
    #[serde(default)]
    pub transitions: Vec<StatusChange>,
}

impl Job {
    /// Create a pending job from a submission.
    pub fn from_spec(id: String, spec: JobSpec, default_max_retries: u32) -> Self {
        let now = now_ms();
        let hint = spec.priority_hint.clamp(0.0, 1.0);
        Self {
            id,
            name: spec.name,
            payload: spec.payload,
            key: spec.key,
            priority: hint,
            priority_hint: hint,
            dependencies: spec.dependencies,
            enqueue_seq: None,
            timeout_ms: spec.timeout.map(duration_ms_u64),
            lane: if spec.urgent { Lane::Interactive } else { spec.lane },
            urgent: spec.urgent,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            last_error: None,
            result: None,
            retry_at: None,
            progress: 0.0,
            metadata: spec.metadata,
            created_at: now,
            started_at: None,
            finished_at: None,
            transitions: vec![StatusChange {
                status: JobStatus::Pending,
                at: now,
            }],
        }
    }

    /// Current attempt number (1-based) for the next or current run.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Time spent waiting since creation.
    pub fn age_ms(&self) -> u64 {
        (now_ms() - self.created_at).max(0) as u64
    }

    /// Timestamp of the most recent change into `status`.
    pub fn last_entered(&self, status: JobStatus) -> Option<i64> {
        self.transitions.iter().rev().find(|c| c.status == status).map(|c| c.at)
    }

    /// Set the status and record the change. Does not validate.
    pub(crate) fn set_status(&mut self, status: JobStatus) {
        if self.status != status {
            self.status = status;
            self.transitions.push(StatusChange { status, at: now_ms() });
        }
    }
}

/// A job submission
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub payload: serde_json::Value,
    pub priority_hint: f64,
    pub dependencies: BTreeSet<String>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub key: Option<String>,
    pub lane: Lane,
    pub urgent: bool,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl JobSpec {
    /// Create a submission for the named body with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
            priority_hint: 0.5,
            dependencies: BTreeSet::new(),
            max_retries: None,
            timeout: None,
            key: None,
            lane: Lane::Background,
            urgent: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, hint: f64) -> Self {
        self.priority_hint = hint;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }

    /// Mark the job urgent, which moves it to the interactive lane.
    pub fn with_urgent(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
