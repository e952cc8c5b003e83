//! Ready queue ordered by priority, FIFO among equal priorities.
//!
//! The queue holds `(priority, sequence, id)` keys in a `BTreeSet` plus an
//! id index. Entries are never mutated in place: a priority change removes the
//! key and inserts a new one.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, SchedulerError};

/// One queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub priority: f64,
    pub sequence: u64,
    pub job_id: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Dispatch order: higher priority first, then lower sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ordered: BTreeSet<QueueEntry>,
    index: HashMap<String, (f64, u64)>,
    next_sequence: u64,
}

impl QueueState {
    fn insert(&mut self, entry: QueueEntry) {
        self.index.insert(entry.job_id.clone(), (entry.priority, entry.sequence));
        self.ordered.insert(entry);
    }

    fn take(&mut self, job_id: &str) -> Option<QueueEntry> {
        let (priority, sequence) = self.index.remove(job_id)?;
        let key = QueueEntry {
            priority,
            sequence,
            job_id: job_id.to_string(),
        };
        self.ordered.take(&key)
    }
}

/// Thread-safe priority queue of ready job ids.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.inner.lock().map_err(|e| SchedulerError::Fatal(format!("queue lock poisoned: {}", e)))
    }

    /// Enqueue a job, returning its sequence number.
    ///
    /// Pushing an id that is already queued replaces its entry.
    pub fn push(&self, job_id: &str, priority: f64) -> Result<u64> {
        let mut state = self.lock()?;
        state.take(job_id);
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.insert(QueueEntry {
            priority,
            sequence,
            job_id: job_id.to_string(),
        });
        Ok(sequence)
    }

    /// Enqueue with an explicit sequence number (used when restoring).
    pub fn push_with_sequence(&self, job_id: &str, priority: f64, sequence: u64) -> Result<()> {
        let mut state = self.lock()?;
        state.take(job_id);
        if sequence >= state.next_sequence {
            state.next_sequence = sequence + 1;
        }
        state.insert(QueueEntry {
            priority,
            sequence,
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    /// Remove and return the first job, in dispatch order, accepted by `predicate`.
    ///
    /// The predicate runs without the queue lock held. An entry that changed
    /// or vanished while the predicate ran is skipped.
    pub fn pop_ready<P>(&self, mut predicate: P) -> Result<Option<String>>
    where
        P: FnMut(&str) -> bool,
    {
        let candidates = self.entries()?;
        for candidate in candidates {
            if !predicate(&candidate.job_id) {
                continue;
            }
            let mut state = self.lock()?;
            let unchanged = state.index.get(&candidate.job_id) == Some(&(candidate.priority, candidate.sequence));
            if unchanged {
                state.take(&candidate.job_id);
                return Ok(Some(candidate.job_id));
            }
        }
        Ok(None)
    }

    /// Remove and return the first job in dispatch order.
    pub fn pop(&self) -> Result<Option<String>> {
        let mut state = self.lock()?;
        let first = state.ordered.first().map(|e| e.job_id.clone());
        Ok(first.and_then(|id| state.take(&id)).map(|e| e.job_id))
    }

    /// Change a queued job's priority by removing and reinserting its entry.
    ///
    /// The entry keeps its sequence number. Returns false if the job is not
    /// queued.
    pub fn reprioritize(&self, job_id: &str, new_priority: f64) -> Result<bool> {
        let mut state = self.lock()?;
        match state.take(job_id) {
            Some(entry) => {
                state.insert(QueueEntry {
                    priority: new_priority,
                    ..entry
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a job from the queue. Returns false if it was not queued.
    pub fn remove(&self, job_id: &str) -> Result<bool> {
        Ok(self.lock()?.take(job_id).is_some())
    }

    pub fn contains(&self, job_id: &str) -> Result<bool> {
        Ok(self.lock()?.index.contains_key(job_id))
    }

    /// Current priority of a queued job.
    pub fn priority_of(&self, job_id: &str) -> Result<Option<f64>> {
        Ok(self.lock()?.index.get(job_id).map(|(p, _)| *p))
    }

    /// Ordered copy of all entries, in dispatch order.
    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.lock()?.ordered.iter().cloned().collect())
    }

    /// The sequence number the next push will receive.
    pub fn next_sequence(&self) -> Result<u64> {
        Ok(self.lock()?.next_sequence)
    }

    /// Raise the next sequence number to at least `sequence`.
    pub fn advance_sequence(&self, sequence: u64) -> Result<()> {
        let mut state = self.lock()?;
        state.next_sequence = state.next_sequence.max(sequence);
        Ok(())
    }

    /// Drop every entry. Sequence numbering continues.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.ordered.clear();
        state.index.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Check that the ordered set and the index agree.
    pub fn verify(&self) -> Result<()> {
        let state = self.lock()?;
        if state.ordered.len() != state.index.len() {
            return Err(SchedulerError::Fatal(format!(
                "queue corrupted: {} ordered entries, {} indexed",
                state.ordered.len(),
                state.index.len()
            )));
        }
        for entry in &state.ordered {
            if state.index.get(&entry.job_id) != Some(&(entry.priority, entry.sequence)) {
                return Err(SchedulerError::Fatal(format!(
                    "queue corrupted: entry {} does not match index",
                    entry.job_id
                )));
            }
        }
        Ok(())
    }
}
