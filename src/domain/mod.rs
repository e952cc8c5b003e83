//! Domain types for jobwright
//!
//! - Job: the job record with identity, payload, scheduling, and lifecycle state
//! - JobSpec: a submission
//! - Lane: interactive or background execution lane
//! - JobOutput / JobOutcome: what a body returns and what an attempt reports
//! - CompletionRecord: entries of the completion feed and history log

pub mod job;
pub mod outcome;

pub use job::{Job, JobSpec, JobStatus, Lane, StatusChange};
pub use outcome::{CompletionRecord, JobOutcome, JobOutput};
