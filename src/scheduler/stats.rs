//! Per-tick reports and cumulative scheduler counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scheduler::mode::Mode;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Pending jobs promoted to ready
    pub promoted: usize,
    /// Failed-transient jobs returned to ready
    pub requeued: usize,
    /// Pending jobs cancelled because a dependency can never complete
    pub cascaded: usize,
    /// Jobs handed to the worker pool
    pub dispatched: usize,
    /// Jobs failed for lack of a registered body
    pub unknown: usize,
    /// Outcomes processed
    pub finished: usize,
    /// Slot budget for this round
    pub budget: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.promoted == 0
            && self.requeued == 0
            && self.cascaded == 0
            && self.dispatched == 0
            && self.unknown == 0
            && self.finished == 0
    }
}

/// Cumulative counters since the scheduler was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub total_dispatched: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_cancelled: u64,
    pub model_updates: u64,
    pub running: usize,
    pub queued: usize,
    pub mode: Mode,
    pub budget_fraction: f64,
    pub by_status: BTreeMap<String, usize>,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a tick report into the counters.
    pub fn record_tick(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.total_dispatched += report.dispatched as u64;
    }

    pub fn succeeded(&mut self) {
        self.total_succeeded += 1;
    }

    pub fn failed(&mut self) {
        self.total_failed += 1;
    }

    pub fn retried(&mut self) {
        self.total_retried += 1;
    }

    pub fn cancelled(&mut self) {
        self.total_cancelled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_report_idle() {
        assert!(TickReport::default().is_idle());
        let report = TickReport {
            dispatched: 1,
            ..Default::default()
        };
        assert!(!report.is_idle());
    }

    #[test]
    fn test_budget_alone_is_idle() {
        let report = TickReport {
            budget: 4,
            ..Default::default()
        };
        assert!(report.is_idle());
    }

    #[test]
    fn test_record_tick() {
        let mut stats = SchedulerStats::new();
        stats.record_tick(&TickReport {
            dispatched: 3,
            ..Default::default()
        });
        stats.record_tick(&TickReport::default());
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.total_dispatched, 3);
    }

    #[test]
    fn test_counters() {
        let mut stats = SchedulerStats::new();
        stats.succeeded();
        stats.failed();
        stats.retried();
        stats.retried();
        stats.cancelled();
        assert_eq!(stats.total_succeeded, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_retried, 2);
        assert_eq!(stats.total_cancelled, 1);
    }
}
