//! Operating mode signal.
//!
//! The scheduler does not decide when the agent is busy. An external controller
//! reports the current mode and the fraction of worker slots the scheduler may
//! use, and the scheduler polls it before each dispatch round.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Agent operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Work,
    Idle,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Work => write!(f, "work"),
            Mode::Idle => write!(f, "idle"),
        }
    }
}

/// Mode plus the share of worker slots available to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeSignal {
    pub mode: Mode,
    /// In [0, 1]
    pub budget_fraction: f64,
}

impl ModeSignal {
    pub fn new(mode: Mode, budget_fraction: f64) -> Self {
        let budget_fraction = if budget_fraction.is_finite() {
            budget_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { mode, budget_fraction }
    }

    /// Full budget.
    pub fn work() -> Self {
        Self::new(Mode::Work, 1.0)
    }

    pub fn idle(budget_fraction: f64) -> Self {
        Self::new(Mode::Idle, budget_fraction)
    }
}

impl Default for ModeSignal {
    fn default() -> Self {
        Self::work()
    }
}

/// Source of the mode signal.
pub trait ModeController: Send + Sync {
    fn current_mode(&self) -> ModeSignal;
}

/// A controller that never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMode(pub ModeSignal);

impl FixedMode {
    pub fn new(signal: ModeSignal) -> Self {
        Self(signal)
    }
}

impl ModeController for FixedMode {
    fn current_mode(&self) -> ModeSignal {
        self.0
    }
}

/// A controller whose signal can be changed at runtime from any thread.
#[derive(Debug, Clone, Default)]
pub struct SharedMode {
    inner: Arc<RwLock<ModeSignal>>,
}

impl SharedMode {
    pub fn new(signal: ModeSignal) -> Self {
        Self {
            inner: Arc::new(RwLock::new(signal)),
        }
    }

    pub fn set(&self, signal: ModeSignal) {
        match self.inner.write() {
            Ok(mut guard) => *guard = signal,
            Err(poisoned) => *poisoned.into_inner() = signal,
        }
        tracing::info!(mode = %signal.mode, budget_fraction = signal.budget_fraction, "Mode changed");
    }
}

impl ModeController for SharedMode {
    fn current_mode(&self) -> ModeSignal {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Mode configuration used when no controller is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub mode: Mode,
    pub work_fraction: f64,
    pub idle_fraction: f64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Work,
            work_fraction: 1.0,
            idle_fraction: 0.25,
        }
    }
}

impl ModeConfig {
    /// Signal for the configured mode.
    pub fn signal(&self) -> ModeSignal {
        match self.mode {
            Mode::Work => ModeSignal::new(Mode::Work, self.work_fraction),
            Mode::Idle => ModeSignal::new(Mode::Idle, self.idle_fraction),
        }
    }

    pub fn signal_for(&self, mode: Mode) -> ModeSignal {
        Self { mode, ..self.clone() }.signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_clamps_fraction() {
        assert_eq!(ModeSignal::new(Mode::Work, 1.5).budget_fraction, 1.0);
        assert_eq!(ModeSignal::new(Mode::Idle, -0.2).budget_fraction, 0.0);
        assert_eq!(ModeSignal::new(Mode::Idle, f64::NAN).budget_fraction, 0.0);
    }

    #[test]
    fn test_fixed_mode() {
        let controller = FixedMode::new(ModeSignal::idle(0.25));
        let signal = controller.current_mode();
        assert_eq!(signal.mode, Mode::Idle);
        assert_eq!(signal.budget_fraction, 0.25);
    }

    #[test]
    fn test_shared_mode_updates_all_clones() {
        let controller = SharedMode::new(ModeSignal::work());
        let other = controller.clone();
        other.set(ModeSignal::idle(0.5));
        assert_eq!(controller.current_mode(), ModeSignal::idle(0.5));
    }

    #[test]
    fn test_mode_config_signal() {
        let config = ModeConfig::default();
        assert_eq!(config.signal(), ModeSignal::work());
        assert_eq!(config.signal_for(Mode::Idle), ModeSignal::idle(0.25));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Work.to_string(), "work");
        assert_eq!(Mode::Idle.to_string(), "idle");
    }
}
