//! Per-attempt execution context handed to job bodies.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::Job;
use crate::error::JobError;
use crate::worker::WorkerEvent;

/// Context for one execution attempt.
///
/// Cheap to clone. A body should call [`JobContext::checkpoint`] between units
/// of work so cancellation and timeouts take effect promptly.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: String,
    name: String,
    attempt: u32,
    token: CancellationToken,
    span: tracing::Span,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl JobContext {
    pub fn new(job: &Job, token: CancellationToken, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        let attempt = job.attempt();
        let span = tracing::info_span!("job", job_id = %job.id, name = %job.name, attempt = attempt);
        Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            attempt,
            token,
            span,
            events,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the attempt is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Return `Err(JobError::Cancelled)` once the attempt has been cancelled.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.token.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Report progress in [0, 1]. Values outside the range are clamped.
    pub fn report_progress(&self, progress: f64) {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        // The receiver only goes away when the scheduler is dropped
        let _ = self.events.send(WorkerEvent::Progress {
            job_id: self.job_id.clone(),
            progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobSpec;

    fn context() -> (JobContext, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let job = Job::from_spec("j1".to_string(), JobSpec::new("index"), 3);
        (JobContext::new(&job, CancellationToken::new(), tx), rx)
    }

    #[test]
    fn test_context_identity() {
        let (ctx, _rx) = context();
        assert_eq!(ctx.job_id(), "j1");
        assert_eq!(ctx.name(), "index");
        assert_eq!(ctx.attempt(), 1);
    }

    #[test]
    fn test_checkpoint_after_cancel() {
        let (ctx, _rx) = context();
        assert!(ctx.checkpoint().is_ok());
        ctx.token().cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.checkpoint(), Err(JobError::Cancelled));
    }

    #[test]
    fn test_report_progress_clamps() {
        let (ctx, mut rx) = context();
        ctx.report_progress(1.7);
        match rx.try_recv().unwrap() {
            WorkerEvent::Progress { job_id, progress } => {
                assert_eq!(job_id, "j1");
                assert_eq!(progress, 1.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let (ctx, _rx) = context();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        ctx.token().cancel();
        handle.await.unwrap();
    }
}
