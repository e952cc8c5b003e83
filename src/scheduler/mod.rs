//! Scheduling core.
//!
//! This module provides:
//! - **Priority models**: score jobs from their hint and learned features, and
//!   learn from each finished attempt.
//! - **Ready queue**: highest priority first, FIFO among equals.
//! - **Retry policy**: exponential backoff for transient failures.
//! - **Mode**: work/idle signal that scales the background concurrency budget.
//! - **Lanes**: interactive jobs run in their own slots, outside the mode budget.
//! - **Scheduler**: the control loop tying store, queue, model, and workers together.
//!
//! # Architecture
//!
//! The scheduler uses a polling model woken early by submissions and outcomes:
//! 1. Worker outcomes are drained and classified (done, retry, failed)
//! 2. Pending jobs with finished dependencies are promoted to the queue
//! 3. The highest-priority ready jobs are dispatched while their lane has room
//!
//! # Example
//!
//! ```ignore
//! use jobwright::{Config, JobSpec, Scheduler};
//! use jobwright::jobs::builtin_registry;
//!
//! let scheduler = Scheduler::new(Config::in_memory(), builtin_registry())?;
//! let id = scheduler.submit(JobSpec::new("noop").with_priority(0.8))?;
//! scheduler.run_until_idle(Duration::from_secs(5)).await?;
//! ```

mod backoff;
mod engine;
mod mode;
mod priority;
mod queue;
mod select;
mod stats;

pub use backoff::{RetryConfig, RetryDecision, RetryPolicy};
pub use engine::{Scheduler, derived_reward};
pub use mode::{FixedMode, Mode, ModeConfig, ModeController, ModeSignal, SharedMode};
pub use priority::{
    AGE_BOOST_MAX, AGE_BOOST_PER_MINUTE, EmaPriority, FEATURE_DIM, JobFeatures, LinearPriority, ModelKind,
    PriorityConfig, PriorityModel, RETRY_PENALTY_MAX, RETRY_PENALTY_PER_RETRY, StaticPriority,
};
pub use queue::{JobQueue, QueueEntry};
pub use select::ConcurrencyConfig;
pub use stats::{SchedulerStats, TickReport};
