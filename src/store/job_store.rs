//! In-memory job registry with lifecycle enforcement.
//!
//! Every mutation goes through a single write lock. Mutators run against a
//! copy of the record, so a rejected change leaves the stored job untouched.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobStatus, StatusChange};
use crate::error::{Result, SchedulerError};
use crate::id::now_ms;

/// Serializable store state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub retired_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<String, Job>,
    /// Ids removed by garbage collection; never handed out again
    retired: HashSet<String>,
}

/// Thread-safe registry of job records.
#[derive(Debug, Default)]
pub struct JobStore {
    inner: RwLock<StoreState>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.inner
            .read()
            .map_err(|e| SchedulerError::Fatal(format!("job store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.inner
            .write()
            .map_err(|e| SchedulerError::Fatal(format!("job store lock poisoned: {}", e)))
    }

    /// Register a new job.
    ///
    /// Rejects duplicate or retired ids, unknown dependencies, and dependency
    /// sets that would close a cycle. Nothing is stored on rejection.
    pub fn register(&self, job: Job) -> Result<String> {
        validate_record(&job)?;
        let mut state = self.write()?;

        if state.jobs.contains_key(&job.id) || state.retired.contains(&job.id) {
            return Err(SchedulerError::Validation(format!("duplicate job id: {}", job.id)));
        }
        for dep in &job.dependencies {
            if !state.jobs.contains_key(dep) {
                return Err(SchedulerError::Validation(format!(
                    "job {} depends on unknown job {}",
                    job.id, dep
                )));
            }
        }
        if let Some(path) = find_cycle(&state.jobs, &job.id, &job.dependencies) {
            return Err(SchedulerError::DependencyCycle {
                job_id: job.id.clone(),
                path,
            });
        }

        let id = job.id.clone();
        state.jobs.insert(id.clone(), job);
        Ok(id)
    }

    /// Add dependency edges to a pending job.
    pub fn add_dependencies(&self, id: &str, deps: &BTreeSet<String>) -> Result<Job> {
        let mut state = self.write()?;

        let status = state
            .jobs
            .get(id)
            .map(|job| job.status)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        for dep in deps {
            if !state.jobs.contains_key(dep) {
                return Err(SchedulerError::Validation(format!(
                    "job {} depends on unknown job {}",
                    id, dep
                )));
            }
        }
        if let Some(path) = find_cycle(&state.jobs, id, deps) {
            return Err(SchedulerError::DependencyCycle {
                job_id: id.to_string(),
                path,
            });
        }
        // Cycles are reported even for jobs that can no longer take new edges
        if status != JobStatus::Pending {
            return Err(SchedulerError::Validation(format!(
                "dependencies can only be added to pending jobs ({} is {})",
                id, status
            )));
        }

        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        job.dependencies.extend(deps.iter().cloned());
        Ok(job.clone())
    }

    /// Get a copy of a job.
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.read()?.jobs.get(id).cloned())
    }

    /// Get a copy of a job, failing if it does not exist.
    pub fn require(&self, id: &str) -> Result<Job> {
        self.get(id)?.ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Apply `mutator` to a job under the store lock.
    ///
    /// The mutator works on a copy; the copy is committed only if the mutator
    /// succeeds and any status change is allowed by the lifecycle.
    pub fn update<T, F>(&self, id: &str, mutator: F) -> Result<T>
    where
        F: FnOnce(&mut Job) -> Result<T>,
    {
        let mut state = self.write()?;
        let current = state
            .jobs
            .get(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;

        let mut updated = current.clone();
        let out = mutator(&mut updated)?;

        if updated.id != current.id {
            return Err(SchedulerError::Validation(format!("job id is immutable ({})", id)));
        }
        if updated.status != current.status {
            if !current.status.can_transition_to(updated.status) {
                return Err(SchedulerError::InvalidTransition {
                    job_id: id.to_string(),
                    from: current.status,
                    to: updated.status,
                });
            }
            if updated.transitions.last().map(|c| c.status) != Some(updated.status) {
                updated.transitions.push(StatusChange {
                    status: updated.status,
                    at: now_ms(),
                });
            }
        }
        validate_record(&updated)?;

        state.jobs.insert(id.to_string(), updated);
        Ok(out)
    }

    /// Copies of all jobs matching `predicate`, oldest first.
    pub fn list<P>(&self, predicate: P) -> Result<Vec<Job>>
    where
        P: Fn(&Job) -> bool,
    {
        let state = self.read()?;
        let mut jobs: Vec<Job> = state.jobs.values().filter(|j| predicate(j)).cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Current status of every job.
    pub fn status_map(&self) -> Result<HashMap<String, JobStatus>> {
        let state = self.read()?;
        Ok(state.jobs.iter().map(|(id, job)| (id.clone(), job.status)).collect())
    }

    /// A non-terminal job carrying the given dedupe key, if any.
    pub fn find_active_by_key(&self, key: &str) -> Result<Option<Job>> {
        let state = self.read()?;
        Ok(state
            .jobs
            .values()
            .find(|j| j.key.as_deref() == Some(key) && !j.status.is_terminal())
            .cloned())
    }

    /// Number of jobs per status.
    pub fn count_by_status(&self) -> Result<HashMap<JobStatus, usize>> {
        let state = self.read()?;
        let mut counts = HashMap::new();
        for job in state.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.jobs.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove terminal jobs matching `predicate`, retiring their ids.
    ///
    /// A job still listed as a dependency of a live job is kept.
    pub fn remove_terminal<P>(&self, predicate: P) -> Result<Vec<String>>
    where
        P: Fn(&Job) -> bool,
    {
        let mut state = self.write()?;

        let still_needed: HashSet<String> = state
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .flat_map(|j| j.dependencies.iter().cloned())
            .collect();

        let doomed: Vec<String> = state
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && !still_needed.contains(&j.id) && predicate(j))
            .map(|j| j.id.clone())
            .collect();

        for id in &doomed {
            state.jobs.remove(id);
            state.retired.insert(id.clone());
        }
        Ok(doomed)
    }

    /// Serializable copy of the whole store.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let jobs = self.list(|_| true)?;
        let state = self.read()?;
        let mut retired_ids: Vec<String> = state.retired.iter().cloned().collect();
        retired_ids.sort();
        Ok(StoreSnapshot { jobs, retired_ids })
    }

    /// Replace the store contents with a snapshot.
    pub fn restore(&self, snapshot: StoreSnapshot) -> Result<()> {
        let mut jobs = HashMap::with_capacity(snapshot.jobs.len());
        for job in snapshot.jobs {
            validate_record(&job)?;
            let id = job.id.clone();
            if jobs.insert(id.clone(), job).is_some() {
                return Err(SchedulerError::Validation(format!("duplicate job id in snapshot: {}", id)));
            }
        }

        let mut state = self.write()?;
        state.jobs = jobs;
        state.retired = snapshot.retired_ids.into_iter().collect();
        Ok(())
    }
}

fn validate_record(job: &Job) -> Result<()> {
    if job.id.trim().is_empty() {
        return Err(SchedulerError::Validation("job id must not be empty".to_string()));
    }
    if job.name.trim().is_empty() {
        return Err(SchedulerError::Validation("job name must not be empty".to_string()));
    }
    for (label, value) in [("priority", job.priority), ("priority_hint", job.priority_hint)] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(SchedulerError::Validation(format!(
                "{} must be within [0, 1], got {}",
                label, value
            )));
        }
    }
    Ok(())
}

/// Find a dependency path from `id` back to itself if `id` gained `deps`.
///
/// Returns the cycle as `[id, dep, ..., id]` where each element depends on the
/// next.
fn find_cycle(jobs: &HashMap<String, Job>, id: &str, deps: &BTreeSet<String>) -> Option<Vec<String>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    for dep in deps {
        if !parent.contains_key(dep.as_str()) {
            parent.insert(dep.as_str(), id);
            stack.push(dep.as_str());
        }
    }

    while let Some(node) = stack.pop() {
        if node == id {
            let mut path = vec![id.to_string()];
            let mut cur = parent[node];
            while cur != id {
                path.push(cur.to_string());
                cur = parent[cur];
            }
            path.push(id.to_string());
            path.reverse();
            return Some(path);
        }
        if let Some(job) = jobs.get(node) {
            for next in &job.dependencies {
                if !parent.contains_key(next.as_str()) {
                    parent.insert(next.as_str(), node);
                    stack.push(next.as_str());
                }
            }
        }
    }

    None
}
