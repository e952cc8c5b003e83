//! Concurrency budget and per-name limits.
//!
//! Background jobs may occupy at most `floor(max_workers × budget_fraction)`
//! slots. Interactive jobs have their own `interactive_workers` slots that the
//! mode does not scale. Both lanes share the `max_workers` ceiling. Optional
//! per-name limits cap how many jobs of one body may run at once; they are
//! applied while popping from the queue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Lane;
use crate::scheduler::mode::ModeSignal;

/// Configuration for concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Worker slots; the hard ceiling on running jobs
    pub max_workers: usize,
    /// Interactive jobs allowed to run at once, whatever the mode
    pub interactive_workers: usize,
    /// Per-name limits (optional)
    pub per_name: HashMap<String, usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            interactive_workers: 1,
            per_name: HashMap::new(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            interactive_workers: 1,
            per_name: HashMap::new(),
        }
    }

    /// Set a per-name limit.
    pub fn with_name_limit(mut self, name: impl Into<String>, limit: usize) -> Self {
        self.per_name.insert(name.into(), limit);
        self
    }

    /// Slots the mode allows in total: `floor(max_workers × budget_fraction)`.
    pub fn budget(&self, signal: &ModeSignal) -> usize {
        let fraction = signal.budget_fraction.clamp(0.0, 1.0);
        // Absorb float error in products like 100 × 0.29
        let slots = (self.max_workers as f64 * fraction + 1e-9).floor() as usize;
        slots.min(self.max_workers)
    }

    pub fn with_interactive_workers(mut self, n: usize) -> Self {
        self.interactive_workers = n;
        self
    }

    /// Slots the interactive lane may hold, independent of the mode.
    pub fn interactive_budget(&self) -> usize {
        self.interactive_workers.min(self.max_workers)
    }

    /// Whether one more job in `lane` may start with `running_in_lane` already running there.
    pub fn lane_allows(&self, lane: Lane, signal: &ModeSignal, running_in_lane: usize) -> bool {
        match lane {
            Lane::Interactive => running_in_lane < self.interactive_budget(),
            Lane::Background => running_in_lane < self.budget(signal),
        }
    }

    /// Slots still free this round.
    pub fn available_slots(&self, signal: &ModeSignal, running: usize) -> usize {
        self.budget(signal).saturating_sub(running)
    }

    pub fn has_name_limits(&self) -> bool {
        !self.per_name.is_empty()
    }

    /// Whether one more job named `name` may start given current per-name counts.
    pub fn allows(&self, name: &str, running_by_name: &HashMap<String, usize>) -> bool {
        match self.per_name.get(name) {
            Some(limit) => running_by_name.get(name).copied().unwrap_or(0) < *limit,
            None => true,
        }
    }
}
