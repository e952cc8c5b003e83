//! Bounded worker pool.
//!
//! Each dispatch takes a semaphore permit and spawns one tokio task running the
//! job body. The task enforces the timeout, catches panics, and always reports
//! a [`JobOutcome`] back over the event channel. The permit is released before
//! the outcome is sent.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, mpsc};
use tracing::Instrument;

use crate::domain::{Job, JobOutcome, JobOutput};
use crate::error::{JobError, Result, SchedulerError};
use crate::id::duration_ms_u64;
use crate::worker::{JobContext, JobRegistry};

/// Events sent from workers to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A body reported progress
    Progress { job_id: String, progress: f64 },
    /// An attempt finished
    Finished(JobOutcome),
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Timeout for jobs that do not set their own (milliseconds)
    pub default_timeout_ms: u64,
    /// How long a timed-out body may take to return after cancellation (milliseconds)
    pub grace_period_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 300_000,
            grace_period_ms: 1_000,
        }
    }
}

/// Bounded set of execution slots.
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    registry: Arc<JobRegistry>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    wake: Arc<Notify>,
    default_timeout: Duration,
    grace_period: Duration,
}

impl WorkerPool {
    pub fn new(
        max_workers: usize,
        registry: Arc<JobRegistry>,
        config: &WorkerConfig,
        events: mpsc::UnboundedSender<WorkerEvent>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            registry,
            events,
            wake,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            grace_period: Duration::from_millis(config.grace_period_ms),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held by running bodies.
    pub fn in_use(&self) -> usize {
        self.max_workers.saturating_sub(self.available())
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Sender for worker events, used to build contexts.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<WorkerEvent> {
        self.events.clone()
    }

    /// Timeout applied to `job`.
    pub fn timeout_for(&self, job: &Job) -> Duration {
        job.timeout_ms.map(Duration::from_millis).unwrap_or(self.default_timeout)
    }

    /// Start `job` in a free slot.
    ///
    /// Fails only if no slot is free or no body is registered; both mean the
    /// caller's bookkeeping is wrong. Body errors never surface here.
    pub fn execute(&self, job: &Job, ctx: JobContext) -> Result<()> {
        let handler = self
            .registry
            .get(&job.name)
            .ok_or_else(|| SchedulerError::Fatal(format!("no handler registered for {}", job.name)))?;
        let permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            SchedulerError::Fatal(format!(
                "worker pool exhausted ({} slots) dispatching {}",
                self.max_workers, job.id
            ))
        })?;

        let job_id = job.id.clone();
        let attempt = ctx.attempt();
        let payload = job.payload.clone();
        let timeout = self.timeout_for(job);
        let grace = self.grace_period;
        let events = self.events.clone();
        let wake = self.wake.clone();
        let span = ctx.span().clone();

        tokio::spawn(
            async move {
                let started = Instant::now();
                let result = if ctx.is_cancelled() {
                    tracing::debug!("Cancelled before start, skipping body");
                    Err(JobError::Cancelled)
                } else {
                    run_body(handler.run(ctx.clone(), payload), &ctx, timeout, grace).await
                };
                let duration_ms = duration_ms_u64(started.elapsed());

                match &result {
                    Ok(_) => tracing::info!(duration_ms, "Job succeeded"),
                    Err(e) => tracing::warn!(duration_ms, error = %e, "Job failed"),
                }

                drop(permit);
                let _ = events.send(WorkerEvent::Finished(JobOutcome {
                    job_id,
                    attempt,
                    result,
                    duration_ms,
                }));
                wake.notify_one();
            }
            .instrument(span),
        );
        Ok(())
    }
}

/// Drive a body to completion under a timeout, converting panics to errors.
async fn run_body<F>(body: F, ctx: &JobContext, timeout: Duration, grace: Duration) -> std::result::Result<JobOutput, JobError>
where
    F: std::future::Future<Output = std::result::Result<JobOutput, JobError>>,
{
    let mut body = Box::pin(AssertUnwindSafe(body).catch_unwind());

    tokio::select! {
        res = &mut body => flatten(res),
        _ = tokio::time::sleep(timeout) => {
            ctx.token().cancel();
            if tokio::time::timeout(grace, &mut body).await.is_err() {
                tracing::warn!(grace_ms = duration_ms_u64(grace), "Body ignored cancellation after timeout");
            }
            Err(JobError::Timeout(timeout))
        }
    }
}

fn flatten(
    res: std::result::Result<std::result::Result<JobOutput, JobError>, Box<dyn Any + Send>>,
) -> std::result::Result<JobOutput, JobError> {
    match res {
        Ok(inner) => inner,
        Err(panic) => Err(JobError::Permanent(format!("panicked: {}", panic_message(panic.as_ref())))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
