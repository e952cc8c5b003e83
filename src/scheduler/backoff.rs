//! Retry policy with exponential backoff.
//!
//! A transiently failed job waits `base × 2^retry_count` (capped at
//! `max_backoff`) before returning to the ready queue. A retry-after hint
//! carried by the error raises the delay but never lowers it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Job;
use crate::error::JobError;
use crate::id::duration_ms_u64;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed when a submission does not set its own limit
    pub max_retries: u32,
    /// First backoff delay (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound on any backoff delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after the delay
    Retry { delay: Duration },
    /// Mark the job failed-terminal
    GiveUp,
}

/// Exponential backoff calculator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_backoff: Duration,
    pub default_max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max_backoff: Duration) -> Self {
        Self {
            base,
            max_backoff,
            default_max_retries: RetryConfig::default().max_retries,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max_backoff: Duration::from_millis(config.max_delay_ms),
            default_max_retries: config.max_retries,
        }
    }

    /// Backoff before the retry following `retry_count` earlier retries.
    pub fn delay(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(31));
        let exp_backoff = self.base.saturating_mul(factor).min(self.max_backoff);

        match retry_after {
            Some(hint) => exp_backoff.max(hint),
            None => exp_backoff,
        }
    }

    /// Decide whether a failed attempt of `job` is retried.
    pub fn decide(&self, job: &Job, error: &JobError) -> RetryDecision {
        if error.is_retryable() && job.retry_count < job.max_retries {
            let delay = self.delay(job.retry_count, error.retry_after());
            tracing::debug!(
                job_id = %job.id,
                retry_count = job.retry_count,
                delay_ms = duration_ms_u64(delay),
                "Scheduling retry"
            );
            RetryDecision::Retry { delay }
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
