//! The scheduler control loop.
//!
//! One `Scheduler` value owns the job store, the ready queue, and the priority
//! model. Each tick:
//! 1. Drains worker events (progress, finished attempts) and applies retry
//!    policy and model feedback
//! 2. Promotes pending jobs whose dependencies are done, cancels pending jobs
//!    whose dependencies can never complete, and returns backed-off jobs to ready
//! 3. Dispatches the highest-priority ready jobs while their lane has room:
//!    background jobs within the mode budget, interactive jobs within their own
//!    slots
//!
//! Ticks are serialized. Submission, cancellation, and queries may run
//! concurrently with a tick from any task.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::{CompletionRecord, Job, JobOutcome, JobSpec, JobStatus, Lane};
use crate::error::{JobError, Result, SchedulerError};
use crate::id::{duration_ms, duration_ms_u64, generate_job_id, now_ms};
use crate::scheduler::backoff::{RetryDecision, RetryPolicy};
use crate::scheduler::mode::{FixedMode, ModeController, ModeSignal};
use crate::scheduler::priority::{JobFeatures, PriorityModel};
use crate::scheduler::queue::{JobQueue, QueueEntry};
use crate::scheduler::select::ConcurrencyConfig;
use crate::scheduler::stats::{SchedulerStats, TickReport};
use crate::storage::{HistoryLog, SNAPSHOT_VERSION, SchedulerSnapshot, SnapshotFile};
use crate::store::{JobStore, StoreSnapshot};
use crate::worker::{JobContext, JobRegistry, WorkerEvent, WorkerPool};

/// How often `run` garbage collects old terminal jobs.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Bookkeeping for a dispatched attempt.
struct RunningJob {
    name: String,
    lane: Lane,
    token: CancellationToken,
    /// Features at dispatch time, fed back to the model with the reward
    features: JobFeatures,
    timeout: Duration,
}

/// Running jobs counted for dispatch decisions.
#[derive(Default)]
struct Load {
    total: usize,
    interactive: usize,
    background: usize,
    by_name: HashMap<String, usize>,
}

impl Load {
    fn of<'a>(running: impl Iterator<Item = &'a RunningJob>) -> Self {
        let mut load = Load::default();
        for entry in running {
            load.total += 1;
            match entry.lane {
                Lane::Interactive => load.interactive += 1,
                Lane::Background => load.background += 1,
            }
            *load.by_name.entry(entry.name.clone()).or_insert(0) += 1;
        }
        load
    }

    fn in_lane(&self, lane: Lane) -> usize {
        match lane {
            Lane::Interactive => self.interactive,
            Lane::Background => self.background,
        }
    }
}

/// State only the tick owner touches.
struct LoopState {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// How an outcome was applied to its job.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Applied {
    Done,
    Retry(Duration),
    Failed,
    Cancelled,
    /// The job had already left `running` (cancelled mid-flight)
    Ignored,
}

enum DependencyState {
    Satisfied,
    Waiting,
    Blocked { dep: String, status: String },
}

/// Priority-driven job scheduler.
pub struct Scheduler {
    config: Config,
    store: JobStore,
    queue: JobQueue,
    model: Mutex<Box<dyn PriorityModel>>,
    mode: Arc<dyn ModeController>,
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    retry: RetryPolicy,
    concurrency: ConcurrencyConfig,
    loop_state: tokio::sync::Mutex<LoopState>,
    running: Mutex<HashMap<String, RunningJob>>,
    completed: Mutex<VecDeque<CompletionRecord>>,
    stats: Mutex<SchedulerStats>,
    /// Makes the dedupe-key check and registration one step
    submit_lock: Mutex<()>,
    history: Option<HistoryLog>,
    snapshot_file: Option<SnapshotFile>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| SchedulerError::Fatal(format!("{} lock poisoned: {}", what, e)))
}

/// Reward for a successful attempt without an explicit one: faster is better.
pub fn derived_reward(duration: Duration, timeout: Duration) -> f64 {
    if timeout.is_zero() {
        return 0.5;
    }
    let used = (duration.as_secs_f64() / timeout.as_secs_f64()).min(1.0);
    0.5 + 0.5 * (1.0 - used)
}

impl Scheduler {
    /// Build a scheduler from configuration and a registry of job bodies.
    pub fn new(config: Config, registry: JobRegistry) -> Result<Self> {
        let concurrency = config.scheduler.concurrency.clone();
        if concurrency.max_workers == 0 {
            return Err(SchedulerError::Validation("max_workers must be at least 1".to_string()));
        }
        if concurrency.interactive_workers == 0 {
            return Err(SchedulerError::Validation(
                "interactive_workers must be at least 1".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        let registry = Arc::new(registry);
        let pool = WorkerPool::new(
            concurrency.max_workers,
            registry.clone(),
            &config.worker,
            events_tx,
            wake.clone(),
        );

        let history = match &config.persistence.history_path {
            Some(path) => Some(HistoryLog::open(path)?),
            None => None,
        };
        let snapshot_file = config.persistence.snapshot_path.as_ref().map(SnapshotFile::new);

        Ok(Self {
            store: JobStore::new(),
            queue: JobQueue::new(),
            model: Mutex::new(config.priority.build_model()),
            mode: Arc::new(FixedMode::new(config.mode.signal())),
            registry,
            pool,
            retry: RetryPolicy::from_config(&config.retry),
            concurrency,
            loop_state: tokio::sync::Mutex::new(LoopState { events: events_rx }),
            running: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
            stats: Mutex::new(SchedulerStats::new()),
            submit_lock: Mutex::new(()),
            history,
            snapshot_file,
            wake,
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Use an external mode controller instead of the configured fixed mode.
    pub fn with_mode(mut self, mode: Arc<dyn ModeController>) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the configured priority model.
    pub fn with_model(mut self, model: Box<dyn PriorityModel>) -> Self {
        self.model = Mutex::new(model);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn mode(&self) -> ModeSignal {
        self.mode.current_mode()
    }

    //=== Submission ===

    /// Register a job and return its id.
    ///
    /// A job whose dependencies are already done is enqueued immediately. If the
    /// spec carries a key held by a live job, that job's id is returned instead.
    pub fn submit(&self, spec: JobSpec) -> Result<String> {
        if spec.name.trim().is_empty() {
            return Err(SchedulerError::Validation("job name must not be empty".to_string()));
        }
        if !spec.priority_hint.is_finite() {
            return Err(SchedulerError::Validation(format!(
                "priority hint must be a finite number, got {}",
                spec.priority_hint
            )));
        }

        let id = {
            let _guard = lock(&self.submit_lock, "submit")?;
            if let Some(key) = spec.key.as_deref()
                && let Some(existing) = self.store.find_active_by_key(key)?
            {
                tracing::debug!(job_id = %existing.id, key = %key, "Duplicate key, returning existing job");
                return Ok(existing.id);
            }

            let mut job = Job::from_spec(generate_job_id(), spec, self.retry.default_max_retries);
            job.priority = self.score(&job)?;
            self.store.register(job)?
        };

        let job = self.store.require(&id)?;
        if matches!(self.dependency_state(&job)?, DependencyState::Satisfied) {
            self.enqueue(&id)?;
        }

        tracing::info!(
            job_id = %id,
            name = %job.name,
            priority = job.priority,
            dependencies = job.dependencies.len(),
            "Job submitted"
        );
        self.wake.notify_one();
        Ok(id)
    }

    /// Add dependencies to a job that has not been promoted yet.
    pub fn add_dependencies<I, S>(&self, id: &str, deps: I) -> Result<Job>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deps: BTreeSet<String> = deps.into_iter().map(Into::into).collect();
        let job = self.store.add_dependencies(id, &deps)?;
        tracing::debug!(job_id = %id, dependencies = ?job.dependencies, "Dependencies added");
        Ok(job)
    }

    /// Change a job's priority hint and re-score it. Returns the new effective priority.
    pub fn set_priority_hint(&self, id: &str, hint: f64) -> Result<f64> {
        if !hint.is_finite() {
            return Err(SchedulerError::Validation(format!(
                "priority hint must be a finite number, got {}",
                hint
            )));
        }
        let hint = hint.clamp(0.0, 1.0);
        let job = self.store.update(id, |j| {
            if j.status.is_terminal() {
                return Err(SchedulerError::Validation(format!("job {} is already {}", j.id, j.status)));
            }
            j.priority_hint = hint;
            Ok(j.clone())
        })?;

        let priority = self.score(&job)?;
        self.store.update(id, |j| {
            j.priority = priority;
            Ok(())
        })?;
        self.queue.reprioritize(id, priority)?;
        Ok(priority)
    }

    /// Cancel a job.
    ///
    /// Waiting jobs are cancelled immediately. A running job is marked cancelled
    /// and its token is signalled; the body stops at its next checkpoint.
    /// Returns false if the job had already finished.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let now = now_ms();
        let previous = self.store.update(id, |j| {
            if j.status.is_terminal() {
                return Ok(None);
            }
            let previous = j.status;
            j.status = JobStatus::Cancelled;
            j.finished_at = Some(now);
            j.retry_at = None;
            Ok(Some(previous))
        })?;

        let Some(previous) = previous else {
            return Ok(false);
        };

        if previous == JobStatus::Running {
            if let Some(entry) = lock(&self.running, "running")?.get(id) {
                entry.token.cancel();
            }
        } else {
            self.queue.remove(id)?;
        }

        lock(&self.stats, "stats")?.cancelled();
        let job = self.store.require(id)?;
        let duration_ms = job.started_at.map(|s| (now - s).max(0) as u64).unwrap_or(0);
        self.record_completion(&job, Some("cancelled".to_string()), None, duration_ms, None)?;

        tracing::info!(job_id = %id, from = %previous, "Job cancelled");
        self.wake.notify_one();
        Ok(true)
    }

    //=== Queries ===

    /// Copy of a job record.
    pub fn status(&self, id: &str) -> Result<Job> {
        self.store.require(id)
    }

    /// Copies of all jobs matching `predicate`, oldest first.
    pub fn list<P>(&self, predicate: P) -> Result<Vec<Job>>
    where
        P: Fn(&Job) -> bool,
    {
        self.store.list(predicate)
    }

    /// Ready queue in dispatch order.
    pub fn queued(&self) -> Result<Vec<QueueEntry>> {
        self.queue.entries()
    }

    /// Ids of jobs currently held by workers.
    pub fn running_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = lock(&self.running, "running")?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Take up to `limit` completion records, oldest first.
    pub fn poll_completed(&self, limit: usize) -> Result<Vec<CompletionRecord>> {
        let mut feed = lock(&self.completed, "completed")?;
        let n = limit.min(feed.len());
        Ok(feed.drain(..n).collect())
    }

    /// True when fewer than two jobs are queued or running.
    pub fn is_low_load(&self) -> Result<bool> {
        let queued = self.queue.len()?;
        let running = lock(&self.running, "running")?.len();
        Ok(queued + running < 2)
    }

    /// Counters plus current queue, running, and mode state.
    pub fn stats(&self) -> Result<SchedulerStats> {
        let mut stats = lock(&self.stats, "stats")?.clone();
        stats.running = lock(&self.running, "running")?.len();
        stats.queued = self.queue.len()?;
        let signal = self.mode.current_mode();
        stats.mode = signal.mode;
        stats.budget_fraction = signal.budget_fraction;
        stats.by_status = self
            .store
            .count_by_status()?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        Ok(stats)
    }

    //=== Control loop ===

    /// One reconcile and dispatch round.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut state = self.loop_state.lock().await;
        let mut report = TickReport::default();

        self.drain_events(&mut state, &mut report)?;
        self.promote(&mut report)?;
        self.dispatch(&mut report)?;
        self.queue.verify()?;

        lock(&self.stats, "stats")?.record_tick(&report);
        if !report.is_idle() {
            tracing::debug!(
                promoted = report.promoted,
                requeued = report.requeued,
                cascaded = report.cascaded,
                dispatched = report.dispatched,
                finished = report.finished,
                budget = report.budget,
                "Tick"
            );
        }
        Ok(report)
    }

    /// Tick until shutdown.
    ///
    /// Snapshots periodically and once more on the way out. Only a fatal error
    /// stops the loop early.
    pub async fn run(&self) -> Result<()> {
        let poll = Duration::from_millis(self.config.scheduler.poll_interval_ms.max(1));
        let snapshot_every = Duration::from_secs(self.config.persistence.snapshot_interval_secs.max(1));
        let mut last_snapshot = Instant::now();
        let mut last_gc = Instant::now();

        tracing::info!(
            max_workers = self.concurrency.max_workers,
            mode = %self.mode.current_mode().mode,
            "Scheduler started"
        );

        loop {
            match self.tick().await {
                Ok(_) => {}
                Err(e @ SchedulerError::Fatal(_)) => {
                    tracing::error!(error = %e, "Scheduler halted");
                    return Err(e);
                }
                Err(e) => tracing::warn!(error = %e, "Tick failed"),
            }

            if last_snapshot.elapsed() >= snapshot_every {
                self.persist("periodic");
                last_snapshot = Instant::now();
            }

            if let Some(retain_secs) = self.config.persistence.retain_secs
                && last_gc.elapsed() >= GC_INTERVAL
            {
                if let Err(e) = self.gc(Duration::from_secs(retain_secs)) {
                    tracing::warn!(error = %e, "Garbage collection failed");
                }
                last_gc = Instant::now();
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }

        // Record outcomes that arrived after the last tick
        {
            let mut state = self.loop_state.lock().await;
            let mut report = TickReport::default();
            self.drain_events(&mut state, &mut report)?;
        }
        self.persist("shutdown");
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Tick until every job is terminal, or `timeout` passes.
    ///
    /// Returns true if the scheduler went quiet within the timeout.
    pub async fn run_until_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(self.config.scheduler.poll_interval_ms.max(1));

        loop {
            self.tick().await?;
            if self.is_quiescent()? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll.min(deadline - now)) => {}
            }
        }
    }

    /// Ask `run` to stop after the current tick.
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.shutdown.cancel();
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    //=== Persistence ===

    /// Serializable copy of the scheduler state.
    pub fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let store = self.store.snapshot()?;
        let priority_model_state = lock(&self.model, "model")?.state();
        Ok(SchedulerSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now_ms(),
            jobs: store.jobs,
            priority_model_state,
            queue_sequence: self.queue.next_sequence()?,
            retired_ids: store.retired_ids,
        })
    }

    /// Replace the scheduler state with a snapshot.
    ///
    /// Ready jobs return to the queue with their saved priority and sequence, so
    /// dispatch order is unchanged. Jobs that were running become ready again
    /// without consuming a retry.
    pub fn restore(&self, snapshot: SchedulerSnapshot) -> Result<()> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SchedulerError::Storage(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        if !lock(&self.running, "running")?.is_empty() {
            return Err(SchedulerError::Validation(
                "cannot restore while jobs are running".to_string(),
            ));
        }

        let mut jobs = snapshot.jobs;
        let mut interrupted = 0;
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Running {
                job.set_status(JobStatus::Ready);
                job.started_at = None;
                job.progress = 0.0;
                interrupted += 1;
            }
        }

        let mut ready: Vec<(String, f64, Option<u64>)> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Ready)
            .map(|j| (j.id.clone(), j.priority, j.enqueue_seq))
            .collect();
        ready.sort_by_key(|(_, _, seq)| seq.unwrap_or(u64::MAX));
        let total = jobs.len();

        self.store.restore(StoreSnapshot {
            jobs,
            retired_ids: snapshot.retired_ids,
        })?;
        lock(&self.model, "model")?.load_state(snapshot.priority_model_state)?;

        self.queue.clear()?;
        self.queue.advance_sequence(snapshot.queue_sequence)?;
        for (id, priority, seq) in &ready {
            match seq {
                Some(seq) => self.queue.push_with_sequence(id, *priority, *seq)?,
                None => {
                    let seq = self.queue.push(id, *priority)?;
                    self.store.update(id, |j| {
                        j.enqueue_seq = Some(seq);
                        Ok(())
                    })?;
                }
            }
        }

        tracing::info!(jobs = total, ready = ready.len(), interrupted, "Scheduler state restored");
        self.wake.notify_one();
        Ok(())
    }

    /// Restore from the configured snapshot file. Returns false if there is none.
    pub fn restore_from_file(&self) -> Result<bool> {
        let Some(file) = &self.snapshot_file else {
            return Ok(false);
        };
        match file.load()? {
            Some(snapshot) => {
                self.restore(snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write the configured snapshot file. Returns false if snapshots are disabled.
    pub fn save_snapshot(&self) -> Result<bool> {
        let Some(file) = &self.snapshot_file else {
            return Ok(false);
        };
        file.save(&self.snapshot()?)?;
        Ok(true)
    }

    fn persist(&self, reason: &str) {
        match self.save_snapshot() {
            Ok(true) => tracing::debug!(reason, "Snapshot written"),
            Ok(false) => {}
            Err(e) => tracing::warn!(reason, error = %e, "Snapshot failed"),
        }
    }

    /// Remove terminal jobs that finished more than `retain_for` ago.
    ///
    /// Removed ids are retired and never issued again. Returns the removed ids.
    pub fn gc(&self, retain_for: Duration) -> Result<Vec<String>> {
        let cutoff = now_ms().saturating_sub(duration_ms(retain_for));
        let running: HashSet<String> = lock(&self.running, "running")?.keys().cloned().collect();
        let removed = self
            .store
            .remove_terminal(|j| !running.contains(&j.id) && j.finished_at.unwrap_or(j.created_at) <= cutoff)?;
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "Garbage collected terminal jobs");
        }
        Ok(removed)
    }

    //=== Internals ===

    fn score(&self, job: &Job) -> Result<f64> {
        let features = JobFeatures::from_job(job);
        let predicted = lock(&self.model, "model")?.predict(&features);
        Ok(self.config.priority.effective_priority(job.priority_hint, predicted))
    }

    fn dependency_state(&self, job: &Job) -> Result<DependencyState> {
        if job.dependencies.is_empty() {
            return Ok(DependencyState::Satisfied);
        }
        let statuses = self.store.status_map()?;
        Ok(dependency_state(job, &statuses))
    }

    fn is_quiescent(&self) -> Result<bool> {
        if !lock(&self.running, "running")?.is_empty() {
            return Ok(false);
        }
        let counts = self.store.count_by_status()?;
        Ok(counts
            .iter()
            .all(|(status, count)| status.is_terminal() || *count == 0))
    }

    /// Move a pending or backed-off job to ready and push it.
    fn enqueue(&self, id: &str) -> Result<bool> {
        let job = self.store.require(id)?;
        let priority = self.score(&job)?;

        let promoted = self.store.update(id, |j| {
            if !matches!(j.status, JobStatus::Pending | JobStatus::FailedTransient) {
                return Ok(false);
            }
            j.status = JobStatus::Ready;
            j.priority = priority;
            j.retry_at = None;
            Ok(true)
        })?;
        if !promoted {
            return Ok(false);
        }

        let seq = self.queue.push(id, priority)?;
        let still_ready = self.store.update(id, |j| {
            if j.status != JobStatus::Ready {
                return Ok(false);
            }
            j.enqueue_seq = Some(seq);
            Ok(true)
        })?;
        if !still_ready {
            // Cancelled between promotion and push
            self.queue.remove(id)?;
        }
        Ok(still_ready)
    }

    fn drain_events(&self, state: &mut LoopState, report: &mut TickReport) -> Result<()> {
        while let Ok(event) = state.events.try_recv() {
            match event {
                WorkerEvent::Progress { job_id, progress } => {
                    let applied = self.store.update(&job_id, |j| {
                        if j.status == JobStatus::Running {
                            j.progress = progress;
                        }
                        Ok(())
                    });
                    match applied {
                        Ok(()) | Err(SchedulerError::JobNotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                WorkerEvent::Finished(outcome) => {
                    self.handle_outcome(outcome)?;
                    report.finished += 1;
                }
            }
        }
        Ok(())
    }

    fn handle_outcome(&self, outcome: JobOutcome) -> Result<()> {
        let entry = lock(&self.running, "running")?.remove(&outcome.job_id);
        let Some(entry) = entry else {
            tracing::warn!(job_id = %outcome.job_id, "Outcome for a job that is not running");
            return Ok(());
        };

        let retry = &self.retry;
        let applied = self.store.update(&outcome.job_id, |job| {
            if job.status != JobStatus::Running || job.attempt() != outcome.attempt {
                return Ok(Applied::Ignored);
            }
            let now = now_ms();
            match &outcome.result {
                Ok(output) => {
                    job.status = JobStatus::Done;
                    job.progress = 1.0;
                    job.finished_at = Some(now);
                    job.last_error = None;
                    job.result = Some(output.value.clone());
                    Ok(Applied::Done)
                }
                Err(JobError::Cancelled) => {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(now);
                    job.last_error = Some(JobError::Cancelled.to_string());
                    Ok(Applied::Cancelled)
                }
                Err(err) => match retry.decide(job, err) {
                    RetryDecision::Retry { delay } => {
                        job.set_status(JobStatus::FailedTransient);
                        let failed_at = job.last_entered(JobStatus::FailedTransient).unwrap_or(now);
                        job.retry_count += 1;
                        job.retry_at = Some(failed_at.saturating_add(duration_ms(delay)));
                        job.last_error = Some(err.to_string());
                        Ok(Applied::Retry(delay))
                    }
                    RetryDecision::GiveUp => {
                        job.status = JobStatus::FailedTerminal;
                        job.finished_at = Some(now);
                        job.last_error = Some(err.to_string());
                        Ok(Applied::Failed)
                    }
                },
            }
        });
        let applied = match applied {
            Ok(applied) => applied,
            Err(SchedulerError::JobNotFound(_)) => Applied::Ignored,
            Err(e) => return Err(e),
        };

        let reward = match (applied, &outcome.result) {
            (Applied::Ignored | Applied::Cancelled, _) => None,
            (_, Ok(output)) => Some(
                output
                    .reward
                    .unwrap_or_else(|| derived_reward(Duration::from_millis(outcome.duration_ms), entry.timeout)),
            ),
            (_, Err(_)) => Some(0.0),
        };
        if let Some(reward) = reward {
            let reward = if reward.is_finite() { reward.clamp(0.0, 1.0) } else { 0.0 };
            lock(&self.model, "model")?.update(&entry.features, reward);
            lock(&self.stats, "stats")?.model_updates += 1;
            self.rescore_queued()?;
        }

        {
            let mut stats = lock(&self.stats, "stats")?;
            match applied {
                Applied::Done => stats.succeeded(),
                Applied::Retry(_) => stats.retried(),
                Applied::Failed => stats.failed(),
                Applied::Cancelled => stats.cancelled(),
                Applied::Ignored => {}
            }
        }

        match applied {
            Applied::Retry(delay) => {
                tracing::info!(
                    job_id = %outcome.job_id,
                    name = %entry.name,
                    attempt = outcome.attempt,
                    delay_ms = duration_ms_u64(delay),
                    "Job failed, retry scheduled"
                );
            }
            Applied::Done | Applied::Failed | Applied::Cancelled => {
                let job = self.store.require(&outcome.job_id)?;
                let (error, result) = match &outcome.result {
                    Ok(output) => (None, Some(output.value.clone())),
                    Err(e) => (Some(e.to_string()), None),
                };
                self.record_completion(&job, error, result, outcome.duration_ms, reward)?;
                tracing::info!(
                    job_id = %job.id,
                    name = %job.name,
                    status = %job.status,
                    attempt = outcome.attempt,
                    duration_ms = outcome.duration_ms,
                    "Job finished"
                );
            }
            Applied::Ignored => {
                tracing::debug!(job_id = %outcome.job_id, "Outcome ignored, job no longer running");
            }
        }
        Ok(())
    }

    /// Re-score every queued job against the current model.
    fn rescore_queued(&self) -> Result<()> {
        for entry in self.queue.entries()? {
            let Some(job) = self.store.get(&entry.job_id)? else {
                continue;
            };
            if job.status != JobStatus::Ready {
                continue;
            }
            let priority = self.score(&job)?;
            if (priority - entry.priority).abs() > f64::EPSILON {
                self.store.update(&job.id, |j| {
                    if j.status == JobStatus::Ready {
                        j.priority = priority;
                    }
                    Ok(())
                })?;
                self.queue.reprioritize(&job.id, priority)?;
            }
        }
        Ok(())
    }

    fn promote(&self, report: &mut TickReport) -> Result<()> {
        loop {
            let statuses = self.store.status_map()?;
            let now = now_ms();
            let candidates = self.store.list(|j| {
                j.status == JobStatus::Pending
                    || (j.status == JobStatus::FailedTransient && j.retry_at.is_none_or(|at| at <= now))
            })?;

            let mut cascaded = 0;
            for job in candidates {
                if job.status == JobStatus::FailedTransient {
                    if self.enqueue(&job.id)? {
                        report.requeued += 1;
                        tracing::debug!(job_id = %job.id, attempt = job.attempt(), "Backoff elapsed, job ready");
                    }
                    continue;
                }
                match dependency_state(&job, &statuses) {
                    DependencyState::Satisfied => {
                        if self.enqueue(&job.id)? {
                            report.promoted += 1;
                        }
                    }
                    DependencyState::Waiting => {}
                    DependencyState::Blocked { dep, status } => {
                        let reason = format!("dependency {} is {}", dep, status);
                        if self.cancel_blocked(&job.id, &reason)? {
                            cascaded += 1;
                        }
                    }
                }
            }

            report.cascaded += cascaded;
            // A cancellation may block jobs further down the graph
            if cascaded == 0 {
                return Ok(());
            }
        }
    }

    fn cancel_blocked(&self, id: &str, reason: &str) -> Result<bool> {
        let cancelled = self.store.update(id, |j| {
            if j.status != JobStatus::Pending {
                return Ok(false);
            }
            j.status = JobStatus::Cancelled;
            j.finished_at = Some(now_ms());
            j.last_error = Some(reason.to_string());
            Ok(true)
        })?;
        if cancelled {
            lock(&self.stats, "stats")?.cancelled();
            let job = self.store.require(id)?;
            self.record_completion(&job, Some(reason.to_string()), None, 0, None)?;
            tracing::warn!(job_id = %id, reason = %reason, "Job cancelled, dependency cannot complete");
        }
        Ok(cancelled)
    }

    fn dispatch(&self, report: &mut TickReport) -> Result<()> {
        let signal = self.mode.current_mode();
        let budget = self.concurrency.budget(&signal);
        report.budget = budget;

        loop {
            let load = Load::of(lock(&self.running, "running")?.values());
            if load.total >= self.concurrency.max_workers {
                break;
            }
            let interactive_open = self.concurrency.lane_allows(Lane::Interactive, &signal, load.interactive);
            let background_open = self.concurrency.lane_allows(Lane::Background, &signal, load.background);
            if !interactive_open && !background_open {
                break;
            }

            let popped = if interactive_open && background_open && !self.concurrency.has_name_limits() {
                self.queue.pop()?
            } else {
                self.queue.pop_ready(|id| match self.store.get(id) {
                    Ok(Some(job)) => {
                        self.concurrency.lane_allows(job.lane, &signal, load.in_lane(job.lane))
                            && self.concurrency.allows(&job.name, &load.by_name)
                    }
                    _ => true,
                })?
            };
            let Some(id) = popped else {
                break;
            };

            let Some(job) = self.store.get(&id)? else {
                continue;
            };
            if job.status != JobStatus::Ready {
                continue;
            }

            if !self.registry.contains(&job.name) {
                self.fail_unknown(&job)?;
                report.unknown += 1;
                continue;
            }

            if self.start(&job)? {
                report.dispatched += 1;
            }
        }
        Ok(())
    }

    /// Hand a ready job to the worker pool.
    fn start(&self, job: &Job) -> Result<bool> {
        let token = CancellationToken::new();
        // Registered before the status change so a concurrent cancel finds the token
        lock(&self.running, "running")?.insert(
            job.id.clone(),
            RunningJob {
                name: job.name.clone(),
                lane: job.lane,
                token: token.clone(),
                features: JobFeatures::from_job(job),
                timeout: self.pool.timeout_for(job),
            },
        );

        let started = self.store.update(&job.id, |j| {
            if j.status != JobStatus::Ready {
                return Ok(false);
            }
            j.status = JobStatus::Running;
            j.started_at = Some(now_ms());
            j.progress = 0.0;
            Ok(true)
        });
        if !matches!(started, Ok(true)) {
            lock(&self.running, "running")?.remove(&job.id);
            return started;
        }

        let job = self.store.require(&job.id)?;
        let ctx = JobContext::new(&job, token, self.pool.event_sender());
        if let Err(e) = self.pool.execute(&job, ctx) {
            lock(&self.running, "running")?.remove(&job.id);
            return Err(e);
        }

        tracing::info!(
            job_id = %job.id,
            name = %job.name,
            attempt = job.attempt(),
            priority = job.priority,
            lane = %job.lane,
            "Job dispatched"
        );
        Ok(true)
    }

    fn fail_unknown(&self, job: &Job) -> Result<()> {
        let error = JobError::UnknownJobType(job.name.clone());
        self.store.update(&job.id, |j| {
            j.status = JobStatus::Running;
            Ok(())
        })?;
        self.store.update(&job.id, |j| {
            j.status = JobStatus::FailedTerminal;
            j.finished_at = Some(now_ms());
            j.last_error = Some(error.to_string());
            Ok(())
        })?;

        lock(&self.stats, "stats")?.failed();
        let failed = self.store.require(&job.id)?;
        self.record_completion(&failed, Some(error.to_string()), None, 0, None)?;
        tracing::error!(job_id = %job.id, name = %job.name, "No handler registered for job");
        Ok(())
    }

    fn record_completion(
        &self,
        job: &Job,
        error: Option<String>,
        result: Option<serde_json::Value>,
        duration_ms: u64,
        reward: Option<f64>,
    ) -> Result<()> {
        let record = CompletionRecord {
            job_id: job.id.clone(),
            name: job.name.clone(),
            status: job.status,
            attempt: job.attempt(),
            error,
            result,
            duration_ms,
            reward,
            finished_at: job.finished_at.unwrap_or_else(now_ms),
        };

        let capacity = self.config.scheduler.completion_feed_capacity;
        if capacity > 0 {
            let mut feed = lock(&self.completed, "completed")?;
            while feed.len() >= capacity {
                feed.pop_front();
            }
            feed.push_back(record.clone());
        }

        if let Some(history) = &self.history
            && let Err(e) = history.append(&record)
        {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to append history record");
        }
        Ok(())
    }
}

fn dependency_state(job: &Job, statuses: &HashMap<String, JobStatus>) -> DependencyState {
    let mut waiting = false;
    for dep in &job.dependencies {
        match statuses.get(dep) {
            Some(JobStatus::Done) => {}
            Some(status @ (JobStatus::FailedTerminal | JobStatus::Cancelled)) => {
                return DependencyState::Blocked {
                    dep: dep.clone(),
                    status: status.to_string(),
                };
            }
            Some(_) => waiting = true,
            None => {
                return DependencyState::Blocked {
                    dep: dep.clone(),
                    status: "missing".to_string(),
                };
            }
        }
    }
    if waiting {
        DependencyState::Waiting
    } else {
        DependencyState::Satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobOutput;
    use crate::scheduler::mode::{Mode, SharedMode};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register_fn("noop", |_ctx, _payload| async move { Ok(JobOutput::default()) });
        registry.register_fn("fail", |_ctx, _payload| async move { Err(JobError::permanent("broken")) });
        registry.register_fn("wait", |ctx, _payload| async move {
            ctx.cancelled().await;
            Err(JobError::Cancelled)
        });
        registry.register_fn("answer", |_ctx, _payload| async move { Ok(JobOutput::new(json!({"answer": 42}))) });
        // Transient failure whose retry-after hint is `ms` from the payload, or Duration::MAX
        registry.register_fn("throttled", |_ctx, payload| async move {
            let retry_after = payload
                .get("ms")
                .and_then(|v| v.as_u64())
                .map(Duration::from_millis)
                .unwrap_or(Duration::MAX);
            Err(JobError::Transient {
                message: "rate limited".to_string(),
                retry_after: Some(retry_after),
            })
        });
        registry
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Config::in_memory().with_max_workers(2), registry()).unwrap()
    }

    async fn tick_until(s: &Scheduler, id: &str, status: JobStatus) {
        for _ in 0..400 {
            s.tick().await.unwrap();
            if s.status(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    #[test]
    fn test_derived_reward() {
        let timeout = Duration::from_secs(10);
        assert_eq!(derived_reward(Duration::ZERO, timeout), 1.0);
        assert_eq!(derived_reward(Duration::from_secs(5), timeout), 0.75);
        assert_eq!(derived_reward(Duration::from_secs(20), timeout), 0.5);
        assert_eq!(derived_reward(Duration::from_secs(1), Duration::ZERO), 0.5);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Scheduler::new(Config::in_memory().with_max_workers(0), registry()).err().unwrap();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn test_submit_without_deps_is_ready() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("noop")).unwrap();
        let job = s.status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.enqueue_seq, Some(0));
        assert_eq!(s.queued().unwrap().len(), 1);
    }

    #[test]
    fn test_submit_with_pending_dep_stays_pending() {
        let s = scheduler();
        let a = s.submit(JobSpec::new("noop")).unwrap();
        let b = s.submit(JobSpec::new("noop").with_dependencies([a.as_str()])).unwrap();
        assert_eq!(s.status(&b).unwrap().status, JobStatus::Pending);
        assert_eq!(s.queued().unwrap().len(), 1);
    }

    #[test]
    fn test_submit_rejects_empty_name_and_nan_hint() {
        let s = scheduler();
        assert!(matches!(s.submit(JobSpec::new("  ")), Err(SchedulerError::Validation(_))));
        assert!(matches!(
            s.submit(JobSpec::new("noop").with_priority(f64::NAN)),
            Err(SchedulerError::Validation(_))
        ));
    }

    #[test]
    fn test_submit_rejects_unknown_dependency() {
        let s = scheduler();
        let err = s.submit(JobSpec::new("noop").with_dependencies(["ghost"])).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert!(s.list(|_| true).unwrap().is_empty());
    }

    #[test]
    fn test_hint_orders_queue() {
        let s = scheduler();
        let low = s.submit(JobSpec::new("noop").with_priority(0.1)).unwrap();
        let high = s.submit(JobSpec::new("noop").with_priority(0.9)).unwrap();
        let order: Vec<String> = s.queued().unwrap().into_iter().map(|e| e.job_id).collect();
        assert_eq!(order, vec![high, low]);
    }

    #[test]
    fn test_set_priority_hint_reorders() {
        let s = scheduler();
        let a = s.submit(JobSpec::new("noop").with_priority(0.9)).unwrap();
        let b = s.submit(JobSpec::new("noop").with_priority(0.1)).unwrap();

        let p = s.set_priority_hint(&b, 1.0).unwrap();
        assert!(p > s.status(&a).unwrap().priority);
        assert_eq!(s.queued().unwrap()[0].job_id, b);
        assert_eq!(s.status(&b).unwrap().priority, p);
    }

    #[test]
    fn test_cancel_ready_job() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("noop")).unwrap();
        assert!(s.cancel(&id).unwrap());
        assert_eq!(s.status(&id).unwrap().status, JobStatus::Cancelled);
        assert!(s.queued().unwrap().is_empty());
        assert!(!s.cancel(&id).unwrap());
    }

    #[test]
    fn test_cancel_unknown_job() {
        let s = scheduler();
        assert!(matches!(s.cancel("nope"), Err(SchedulerError::JobNotFound(_))));
    }

    #[test]
    fn test_is_low_load() {
        let s = scheduler();
        assert!(s.is_low_load().unwrap());
        s.submit(JobSpec::new("noop")).unwrap();
        assert!(s.is_low_load().unwrap());
        s.submit(JobSpec::new("noop")).unwrap();
        assert!(!s.is_low_load().unwrap());
    }

    #[tokio::test]
    async fn test_tick_runs_job_to_done() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("noop")).unwrap();

        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
        let job = s.status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 1.0);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());

        let stats = s.stats().unwrap();
        assert_eq!(stats.total_dispatched, 1);
        assert_eq!(stats.total_succeeded, 1);
        assert_eq!(stats.model_updates, 1);
        assert_eq!(stats.by_status.get("done"), Some(&1));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_terminal() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("fail").with_max_retries(5)).unwrap();
        s.run_until_idle(Duration::from_secs(5)).await.unwrap();

        let job = s.status(&id).unwrap();
        assert_eq!(job.status, JobStatus::FailedTerminal);
        assert_eq!(job.retry_count, 0);
        assert!(job.last_error.unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn test_unknown_type_does_not_use_slot() {
        let s = Scheduler::new(Config::in_memory().with_max_workers(1), registry()).unwrap();
        let unknown = s.submit(JobSpec::new("mystery").with_priority(1.0)).unwrap();
        let known = s.submit(JobSpec::new("noop").with_priority(0.0)).unwrap();

        let report = s.tick().await.unwrap();
        assert_eq!(report.unknown, 1);
        assert_eq!(report.dispatched, 1);

        let failed = s.status(&unknown).unwrap();
        assert_eq!(failed.status, JobStatus::FailedTerminal);
        assert!(failed.last_error.unwrap().contains("unknown job type"));
        assert_eq!(s.status(&known).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("wait")).unwrap();
        s.tick().await.unwrap();
        assert_eq!(s.status(&id).unwrap().status, JobStatus::Running);

        assert!(s.cancel(&id).unwrap());
        assert_eq!(s.status(&id).unwrap().status, JobStatus::Cancelled);

        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
        assert_eq!(s.status(&id).unwrap().status, JobStatus::Cancelled);
        assert!(s.running_ids().unwrap().is_empty());
        // Cancelled attempts give the model no feedback
        assert_eq!(s.stats().unwrap().model_updates, 0);
    }

    #[tokio::test]
    async fn test_budget_follows_mode() {
        let mode = SharedMode::new(ModeSignal::idle(0.5));
        let s = Scheduler::new(Config::in_memory().with_max_workers(2), registry())
            .unwrap()
            .with_mode(Arc::new(mode.clone()));
        for _ in 0..3 {
            s.submit(JobSpec::new("wait")).unwrap();
        }

        let report = s.tick().await.unwrap();
        assert_eq!(report.budget, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(s.stats().unwrap().mode, Mode::Idle);

        mode.set(ModeSignal::work());
        let report = s.tick().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(s.running_ids().unwrap().len(), 2);

        for id in s.running_ids().unwrap() {
            s.cancel(&id).unwrap();
        }
        for entry in s.queued().unwrap() {
            s.cancel(&entry.job_id).unwrap();
        }
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_name_limits_honored() {
        let mut config = Config::in_memory().with_max_workers(3);
        config.scheduler.concurrency.per_name.insert("wait".to_string(), 1);
        let s = Scheduler::new(config, registry()).unwrap();

        s.submit(JobSpec::new("wait").with_priority(0.9)).unwrap();
        s.submit(JobSpec::new("wait").with_priority(0.8)).unwrap();
        let noop = s.submit(JobSpec::new("noop").with_priority(0.1)).unwrap();

        let report = s.tick().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_ne!(s.status(&noop).unwrap().status, JobStatus::Ready);
        assert_eq!(s.queued().unwrap().len(), 1);

        for job in s.list(|j| !j.status.is_terminal()).unwrap() {
            s.cancel(&job.id).unwrap();
        }
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_progress_recorded() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        let gate = Arc::new(Notify::new());
        {
            let gate = gate.clone();
            let seen = seen.clone();
            registry.register_fn("steps", move |ctx, _payload| {
                let gate = gate.clone();
                let seen = seen.clone();
                async move {
                    ctx.report_progress(0.4);
                    seen.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(JobOutput::default())
                }
            });
        }
        let s = Scheduler::new(Config::in_memory(), registry).unwrap();
        let id = s.submit(JobSpec::new("steps")).unwrap();
        s.tick().await.unwrap();

        while seen.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        s.tick().await.unwrap();
        assert_eq!(s.status(&id).unwrap().progress, 0.4);

        gate.notify_one();
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
        assert_eq!(s.status(&id).unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn test_completion_feed_and_poll() {
        let s = scheduler();
        let ok = s.submit(JobSpec::new("noop")).unwrap();
        let bad = s.submit(JobSpec::new("fail")).unwrap();
        s.run_until_idle(Duration::from_secs(5)).await.unwrap();

        let first = s.poll_completed(1).unwrap();
        assert_eq!(first.len(), 1);
        let rest = s.poll_completed(10).unwrap();
        assert_eq!(rest.len(), 1);

        let all: Vec<CompletionRecord> = first.into_iter().chain(rest).collect();
        let ok_record = all.iter().find(|r| r.job_id == ok).unwrap();
        assert_eq!(ok_record.status, JobStatus::Done);
        assert!(ok_record.reward.unwrap() > 0.5);
        let bad_record = all.iter().find(|r| r.job_id == bad).unwrap();
        assert_eq!(bad_record.status, JobStatus::FailedTerminal);
        assert_eq!(bad_record.reward, Some(0.0));

        assert!(s.poll_completed(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_feed_is_bounded() {
        let mut config = Config::in_memory().with_max_workers(4);
        config.scheduler.completion_feed_capacity = 3;
        let s = Scheduler::new(config, registry()).unwrap();
        for _ in 0..5 {
            s.submit(JobSpec::new("noop")).unwrap();
        }
        s.run_until_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(s.poll_completed(100).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gc_retires_ids() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("noop")).unwrap();
        s.run_until_idle(Duration::from_secs(5)).await.unwrap();

        assert!(s.gc(Duration::from_secs(3600)).unwrap().is_empty());
        assert!(s.gc(Duration::MAX).unwrap().is_empty());
        let removed = s.gc(Duration::ZERO).unwrap();
        assert_eq!(removed, vec![id.clone()]);
        assert!(matches!(s.status(&id), Err(SchedulerError::JobNotFound(_))));
        assert!(s.snapshot().unwrap().retired_ids.contains(&id));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let s = Arc::new(scheduler());
        let id = s.submit(JobSpec::new("noop")).unwrap();

        let runner = {
            let s = s.clone();
            tokio::spawn(async move { s.run().await })
        };
        while s.status(&id).unwrap().status != JobStatus::Done {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        s.shutdown();
        runner.await.unwrap().unwrap();
        assert!(s.is_shutdown());
    }

    #[tokio::test]
    async fn test_huge_retry_after_hint_saturates() {
        let s = scheduler();
        let forever = s
            .submit(JobSpec::new("throttled").with_max_retries(3))
            .unwrap();
        let near_max = s
            .submit(
                JobSpec::new("throttled")
                    .with_payload(json!({"ms": (i64::MAX - 1000) as u64}))
                    .with_max_retries(3),
            )
            .unwrap();

        tick_until(&s, &forever, JobStatus::FailedTransient).await;
        tick_until(&s, &near_max, JobStatus::FailedTransient).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        s.tick().await.unwrap();

        for id in [&forever, &near_max] {
            let job = s.status(id).unwrap();
            assert_eq!(job.status, JobStatus::FailedTransient);
            assert_eq!(job.retry_at, Some(i64::MAX));
            assert_eq!(job.retry_count, 1);
            assert!(s.cancel(id).unwrap());
        }
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_poisoned_store_halts_run() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("noop")).unwrap();

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = s.store.update(&id, |_| -> Result<()> { panic!("corrupted record") });
        }));
        assert!(panicked.is_err());

        let result = tokio::time::timeout(Duration::from_secs(5), s.run()).await.unwrap();
        assert!(matches!(result, Err(SchedulerError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_result_kept_after_feed_drained() {
        let s = scheduler();
        let id = s.submit(JobSpec::new("answer")).unwrap();
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());

        assert_eq!(s.poll_completed(10).unwrap().len(), 1);
        assert_eq!(s.status(&id).unwrap().result, Some(json!({"answer": 42})));
    }

    #[tokio::test]
    async fn test_urgent_job_runs_while_paused() {
        let mode = SharedMode::new(ModeSignal::idle(0.0));
        let s = scheduler().with_mode(Arc::new(mode.clone()));
        let background = s.submit(JobSpec::new("wait").with_priority(1.0)).unwrap();
        let urgent = s.submit(JobSpec::new("wait").with_urgent(true)).unwrap();

        let report = s.tick().await.unwrap();
        assert_eq!(report.budget, 0);
        assert_eq!(report.dispatched, 1);
        assert_eq!(s.status(&urgent).unwrap().status, JobStatus::Running);
        assert_eq!(s.status(&background).unwrap().status, JobStatus::Ready);

        s.cancel(&urgent).unwrap();
        s.cancel(&background).unwrap();
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_interactive_lane_has_own_cap() {
        let s = scheduler();
        let first = s.submit(JobSpec::new("wait").with_urgent(true).with_priority(0.9)).unwrap();
        let second = s
            .submit(JobSpec::new("wait").with_lane(Lane::Interactive).with_priority(0.8))
            .unwrap();
        let background = s.submit(JobSpec::new("wait").with_priority(0.1)).unwrap();

        // One interactive slot by default; the other worker goes to the background job
        let report = s.tick().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(s.status(&first).unwrap().status, JobStatus::Running);
        assert_eq!(s.status(&second).unwrap().status, JobStatus::Ready);
        assert_eq!(s.status(&background).unwrap().status, JobStatus::Running);

        for id in [&first, &second, &background] {
            s.cancel(id).unwrap();
        }
        assert!(s.run_until_idle(Duration::from_secs(5)).await.unwrap());
    }

    #[test]
    fn test_zero_interactive_workers_rejected() {
        let mut config = Config::in_memory();
        config.scheduler.concurrency.interactive_workers = 0;
        let err = Scheduler::new(config, registry()).err().unwrap();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn test_dependency_state() {
        let mut job = Job::from_spec("c".to_string(), JobSpec::new("noop").with_dependencies(["a", "b"]), 0);
        let mut statuses = HashMap::new();
        statuses.insert("a".to_string(), JobStatus::Done);
        statuses.insert("b".to_string(), JobStatus::Running);
        assert!(matches!(dependency_state(&job, &statuses), DependencyState::Waiting));

        statuses.insert("b".to_string(), JobStatus::Done);
        assert!(matches!(dependency_state(&job, &statuses), DependencyState::Satisfied));

        statuses.insert("b".to_string(), JobStatus::Cancelled);
        match dependency_state(&job, &statuses) {
            DependencyState::Blocked { dep, status } => {
                assert_eq!(dep, "b");
                assert_eq!(status, "cancelled");
            }
            _ => panic!("expected blocked"),
        }

        job.dependencies.insert("gone".to_string());
        statuses.insert("b".to_string(), JobStatus::Done);
        assert!(matches!(
            dependency_state(&job, &statuses),
            DependencyState::Blocked { .. }
        ));
    }

    #[test]
    fn test_restore_rejects_newer_version() {
        let s = scheduler();
        let mut snapshot = s.snapshot().unwrap();
        snapshot.version = SNAPSHOT_VERSION + 1;
        assert!(matches!(s.restore(snapshot), Err(SchedulerError::Storage(_))));
    }

    #[test]
    fn test_submit_payload_and_metadata_preserved() {
        let s = scheduler();
        let id = s
            .submit(
                JobSpec::new("noop")
                    .with_payload(json!({"k": 1}))
                    .with_metadata("origin", json!("test")),
            )
            .unwrap();
        let job = s.status(&id).unwrap();
        assert_eq!(job.payload, json!({"k": 1}));
        assert_eq!(job.metadata.get("origin"), Some(&json!("test")));
    }
}
