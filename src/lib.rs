//! Jobwright - A priority-driven background job scheduler
//!
//! Jobwright runs named async job bodies on a bounded worker pool. Ready jobs are
//! dispatched by a learned priority (FIFO on ties), dependencies gate promotion,
//! urgent work runs in an interactive lane that mode throttling does not touch,
//! transient failures retry with exponential backoff, and a work/idle mode signal
//! scales how many jobs may run at once. State survives restarts through JSON
//! snapshots.

pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod jobs;
pub mod reasoning;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::Config;
pub use domain::{CompletionRecord, Job, JobOutput, JobSpec, JobStatus, Lane};
pub use error::{JobError, Result, SchedulerError};
pub use scheduler::{ModeSignal, Scheduler};
pub use worker::{JobContext, JobHandler, JobRegistry};
