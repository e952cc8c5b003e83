//! Shared fixtures for scheduler integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobwright::scheduler::{ModeSignal, SharedMode};
use jobwright::{Config, JobError, JobOutput, JobRegistry, Scheduler};

/// Ids of jobs in the order their bodies started.
#[derive(Clone, Default)]
pub struct Recorder {
    order: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

/// Registry with `record` (logs its id), `noop`, `fail` (permanent), and
/// `block` (runs until cancelled).
pub fn registry(recorder: &Recorder) -> JobRegistry {
    let mut registry = JobRegistry::new();
    let order = recorder.order.clone();
    registry.register_fn("record", move |ctx, _payload| {
        let order = order.clone();
        async move {
            order.lock().unwrap().push(ctx.job_id().to_string());
            Ok(JobOutput::default())
        }
    });
    registry.register_fn("noop", |_ctx, _payload| async move { Ok(JobOutput::default()) });
    registry.register_fn("fail", |_ctx, _payload| async move { Err(JobError::permanent("boom")) });
    registry.register_fn("block", |ctx, _payload| async move {
        ctx.cancelled().await;
        Err(JobError::Cancelled)
    });
    registry
}

/// Scheduler whose mode the test controls, starting with no dispatch budget.
pub fn paused_scheduler(config: Config, registry: JobRegistry) -> (Scheduler, SharedMode) {
    let mode = SharedMode::new(ModeSignal::idle(0.0));
    let scheduler = Scheduler::new(config, registry)
        .unwrap()
        .with_mode(Arc::new(mode.clone()));
    (scheduler, mode)
}

pub async fn settle(scheduler: &Scheduler) {
    assert!(
        scheduler.run_until_idle(Duration::from_secs(20)).await.unwrap(),
        "scheduler did not go idle"
    );
}
