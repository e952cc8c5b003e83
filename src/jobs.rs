//! Built-in job bodies.
//!
//! The `run` command registers these so a fresh install has something to
//! schedule:
//! - `noop`: succeeds immediately
//! - `sleep`: waits `{"ms": n}` in small steps, reporting progress
//! - `echo`: returns its payload
//! - `fail`: fails with `{"message": "...", "transient": bool}`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::JobOutput;
use crate::error::JobError;
use crate::worker::{JobContext, JobHandler, JobRegistry};

/// Progress is reported at most this many times by `sleep`.
const SLEEP_STEPS: u32 = 10;

pub struct Noop;

#[async_trait]
impl JobHandler for Noop {
    async fn run(&self, _ctx: JobContext, _payload: serde_json::Value) -> Result<JobOutput, JobError> {
        Ok(JobOutput::default())
    }
}

#[derive(Debug, Deserialize)]
struct SleepArgs {
    #[serde(default = "default_sleep_ms")]
    ms: u64,
}

fn default_sleep_ms() -> u64 {
    100
}

pub struct Sleep;

#[async_trait]
impl JobHandler for Sleep {
    async fn run(&self, ctx: JobContext, payload: serde_json::Value) -> Result<JobOutput, JobError> {
        let args: SleepArgs = parse_args(payload)?;
        let step = Duration::from_millis(args.ms) / SLEEP_STEPS;

        for i in 1..=SLEEP_STEPS {
            tokio::select! {
                _ = ctx.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(step) => {}
            }
            ctx.report_progress(f64::from(i) / f64::from(SLEEP_STEPS));
        }
        Ok(JobOutput::new(serde_json::json!({ "slept_ms": args.ms })))
    }
}

pub struct Echo;

#[async_trait]
impl JobHandler for Echo {
    async fn run(&self, ctx: JobContext, payload: serde_json::Value) -> Result<JobOutput, JobError> {
        ctx.checkpoint()?;
        Ok(JobOutput::new(payload))
    }
}

#[derive(Debug, Deserialize)]
struct FailArgs {
    #[serde(default = "default_fail_message")]
    message: String,
    #[serde(default)]
    transient: bool,
}

fn default_fail_message() -> String {
    "requested failure".to_string()
}

pub struct Fail;

#[async_trait]
impl JobHandler for Fail {
    async fn run(&self, _ctx: JobContext, payload: serde_json::Value) -> Result<JobOutput, JobError> {
        let args: FailArgs = parse_args(payload)?;
        if args.transient {
            Err(JobError::transient(args.message))
        } else {
            Err(JobError::permanent(args.message))
        }
    }
}

/// Null payloads parse as `{}` so every field falls back to its default.
fn parse_args<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T, JobError> {
    let payload = if payload.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|e| JobError::permanent(format!("invalid payload: {}", e)))
}

/// Registry holding every built-in body.
pub fn builtin_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry
        .register("noop", Noop)
        .register("sleep", Sleep)
        .register("echo", Echo)
        .register("fail", Fail);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobSpec};
    use crate::worker::WorkerEvent;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn context(name: &str) -> (JobContext, CancellationToken, mpsc::UnboundedReceiver<WorkerEvent>) {
        let job = Job::from_spec("job-1".to_string(), JobSpec::new(name), 0);
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        (JobContext::new(&job, token.clone(), tx), token, rx)
    }

    #[test]
    fn test_builtin_registry_names() {
        assert_eq!(builtin_registry().names(), vec!["echo", "fail", "noop", "sleep"]);
    }

    #[tokio::test]
    async fn test_noop() {
        let (ctx, _token, _rx) = context("noop");
        assert!(Noop.run(ctx, serde_json::Value::Null).await.is_ok());
    }

    #[tokio::test]
    async fn test_echo_returns_payload() {
        let (ctx, _token, _rx) = context("echo");
        let out = Echo.run(ctx, json!({"hello": "world"})).await.unwrap();
        assert_eq!(out.value, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn test_fail_permanent_by_default() {
        let (ctx, _token, _rx) = context("fail");
        let err = Fail.run(ctx, serde_json::Value::Null).await.unwrap_err();
        assert_eq!(err, JobError::permanent("requested failure"));
    }

    #[tokio::test]
    async fn test_fail_transient() {
        let (ctx, _token, _rx) = context("fail");
        let err = Fail
            .run(ctx, json!({"message": "flaky", "transient": true}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("flaky"));
    }

    #[tokio::test]
    async fn test_sleep_reports_progress() {
        let (ctx, _token, mut rx) = context("sleep");
        let out = Sleep.run(ctx, json!({"ms": 20})).await.unwrap();
        assert_eq!(out.value, json!({"slept_ms": 20}));

        let mut last = 0.0;
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::Progress { progress, .. } = event {
                last = progress;
            }
        }
        assert_eq!(last, 1.0);
    }

    #[tokio::test]
    async fn test_sleep_stops_on_cancel() {
        let (ctx, token, _rx) = context("sleep");
        token.cancel();
        let err = Sleep.run(ctx, json!({"ms": 60_000})).await.unwrap_err();
        assert_eq!(err, JobError::Cancelled);
    }

    #[tokio::test]
    async fn test_bad_payload_is_permanent() {
        let (ctx, _token, _rx) = context("sleep");
        let err = Sleep.run(ctx, json!({"ms": "soon"})).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
