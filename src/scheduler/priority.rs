//! Priority models for job scheduling.
//!
//! A model maps job features to a score in [0, 1] and learns from the reward
//! observed after each attempt. Three models are provided:
//! - **static**: default score plus an age boost, minus a retry penalty. Never learns.
//! - **ema**: per-name exponential moving average of reward.
//! - **linear**: online logistic regression over the feature vector.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Job;
use crate::error::Result;
use crate::id::now_ms;

/// Age boost: +0.01 per minute waiting.
pub const AGE_BOOST_PER_MINUTE: f64 = 0.01;
/// Maximum age boost.
pub const AGE_BOOST_MAX: f64 = 0.2;

/// Retry penalty: -0.05 per retry already consumed.
pub const RETRY_PENALTY_PER_RETRY: f64 = 0.05;
/// Maximum retry penalty.
pub const RETRY_PENALTY_MAX: f64 = 0.3;

/// Number of entries in [`JobFeatures::vector`].
pub const FEATURE_DIM: usize = 5;

/// Observable properties of a job used for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFeatures {
    pub name: String,
    pub priority_hint: f64,
    pub age_ms: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub dependency_count: usize,
}

impl JobFeatures {
    pub fn from_job(job: &Job) -> Self {
        Self {
            name: job.name.clone(),
            priority_hint: job.priority_hint,
            age_ms: (now_ms() - job.created_at).max(0) as u64,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            dependency_count: job.dependencies.len(),
        }
    }

    /// Numeric feature vector, each entry in [0, 1]. The first entry is a bias term.
    pub fn vector(&self) -> [f64; FEATURE_DIM] {
        let age_hours = self.age_ms as f64 / 3_600_000.0;
        let retry_frac = self.retry_count as f64 / (self.max_retries as f64 + 1.0);
        let deps = (self.dependency_count as f64 / 10.0).min(1.0);
        [1.0, self.priority_hint, age_hours.min(1.0), retry_frac.min(1.0), deps]
    }
}

/// A pluggable online scorer.
///
/// `update` takes `&mut self`; the scheduler serializes calls through a mutex.
pub trait PriorityModel: Send {
    /// Short identifier used in logs and snapshots
    fn kind(&self) -> &'static str;

    /// Score in [0, 1]
    fn predict(&self, features: &JobFeatures) -> f64;

    /// One online learning step from an observed reward in [0, 1]
    fn update(&mut self, features: &JobFeatures, reward: f64);

    /// Serializable parameters
    fn state(&self) -> serde_json::Value;

    /// Replace parameters with a previously saved state
    fn load_state(&mut self, state: serde_json::Value) -> Result<()>;
}

/// Which model to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Static,
    Ema,
    Linear,
}

/// Priority configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub model: ModelKind,
    /// Cold-start score before any feedback
    pub default_score: f64,
    /// Weight of the submitter's hint in the effective priority
    pub hint_weight: f64,
    pub learning_rate: f64,
    /// Pull of unobserved names toward the default score (ema)
    pub decay: f64,
    /// L2 weight decay (linear)
    pub l2: f64,
    pub age_boost_per_minute: f64,
    pub age_boost_max: f64,
    pub retry_penalty_per_retry: f64,
    pub retry_penalty_max: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Static,
            default_score: 0.5,
            hint_weight: 0.5,
            learning_rate: 0.1,
            decay: 0.01,
            l2: 0.001,
            age_boost_per_minute: AGE_BOOST_PER_MINUTE,
            age_boost_max: AGE_BOOST_MAX,
            retry_penalty_per_retry: RETRY_PENALTY_PER_RETRY,
            retry_penalty_max: RETRY_PENALTY_MAX,
        }
    }
}

impl PriorityConfig {
    /// Build the configured model.
    pub fn build_model(&self) -> Box<dyn PriorityModel> {
        match self.model {
            ModelKind::Static => Box::new(StaticPriority::from_config(self)),
            ModelKind::Ema => Box::new(EmaPriority::new(self.default_score, self.learning_rate, self.decay)),
            ModelKind::Linear => Box::new(LinearPriority::new(self.default_score, self.learning_rate, self.l2)),
        }
    }

    /// Blend the submitter's hint with a model score.
    pub fn effective_priority(&self, hint: f64, predicted: f64) -> f64 {
        let w = self.hint_weight.clamp(0.0, 1.0);
        let predicted = if predicted.is_finite() {
            predicted
        } else {
            self.default_score
        };
        let blended = w * hint + (1.0 - w) * predicted;
        if blended.is_finite() {
            blended.clamp(0.0, 1.0)
        } else {
            self.default_score.clamp(0.0, 1.0)
        }
    }
}

/// Heuristic scorer: default score, age boost, retry penalty.
#[derive(Debug, Clone)]
pub struct StaticPriority {
    pub default_score: f64,
    pub age_boost_per_minute: f64,
    pub age_boost_max: f64,
    pub retry_penalty_per_retry: f64,
    pub retry_penalty_max: f64,
}

impl StaticPriority {
    pub fn new(default_score: f64) -> Self {
        Self {
            default_score,
            age_boost_per_minute: AGE_BOOST_PER_MINUTE,
            age_boost_max: AGE_BOOST_MAX,
            retry_penalty_per_retry: RETRY_PENALTY_PER_RETRY,
            retry_penalty_max: RETRY_PENALTY_MAX,
        }
    }

    pub fn from_config(config: &PriorityConfig) -> Self {
        Self {
            default_score: config.default_score,
            age_boost_per_minute: config.age_boost_per_minute,
            age_boost_max: config.age_boost_max,
            retry_penalty_per_retry: config.retry_penalty_per_retry,
            retry_penalty_max: config.retry_penalty_max,
        }
    }
}

impl PriorityModel for StaticPriority {
    fn kind(&self) -> &'static str {
        "static"
    }

    fn predict(&self, features: &JobFeatures) -> f64 {
        let mut score = self.default_score;

        let age_minutes = (features.age_ms / 60_000) as f64;
        score += (age_minutes * self.age_boost_per_minute).min(self.age_boost_max);

        let retry_penalty = features.retry_count as f64 * self.retry_penalty_per_retry;
        score -= retry_penalty.min(self.retry_penalty_max);

        score.clamp(0.0, 1.0)
    }

    fn update(&mut self, _features: &JobFeatures, _reward: f64) {}

    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn load_state(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct EmaState {
    scores: HashMap<String, f64>,
    updates: u64,
}

/// Per-name exponential moving average of reward.
///
/// Every update also pulls the other names' scores toward the default, so a
/// name that stops producing feedback drifts back to neutral.
#[derive(Debug, Clone)]
pub struct EmaPriority {
    default_score: f64,
    alpha: f64,
    decay: f64,
    state: EmaState,
}

impl EmaPriority {
    pub fn new(default_score: f64, alpha: f64, decay: f64) -> Self {
        Self {
            default_score: default_score.clamp(0.0, 1.0),
            alpha: alpha.clamp(0.0, 1.0),
            decay: decay.clamp(0.0, 1.0),
            state: EmaState::default(),
        }
    }

    pub fn score_for(&self, name: &str) -> f64 {
        self.state.scores.get(name).copied().unwrap_or(self.default_score)
    }

    pub fn updates(&self) -> u64 {
        self.state.updates
    }
}

impl PriorityModel for EmaPriority {
    fn kind(&self) -> &'static str {
        "ema"
    }

    fn predict(&self, features: &JobFeatures) -> f64 {
        self.score_for(&features.name)
    }

    fn update(&mut self, features: &JobFeatures, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        for (name, score) in self.state.scores.iter_mut() {
            if name != &features.name {
                *score += self.decay * (self.default_score - *score);
            }
        }
        let current = self.score_for(&features.name);
        let next = current + self.alpha * (reward - current);
        self.state.scores.insert(features.name.clone(), next.clamp(0.0, 1.0));
        self.state.updates += 1;
    }

    fn state(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: serde_json::Value) -> Result<()> {
        if state.is_null() {
            return Ok(());
        }
        self.state = serde_json::from_value(state)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearState {
    weights: Vec<f64>,
    updates: u64,
}

/// Online logistic regression: SGD with L2 weight decay.
///
/// The bias starts at `logit(default_score)`, so an untrained model predicts
/// the default score for every job.
#[derive(Debug, Clone)]
pub struct LinearPriority {
    learning_rate: f64,
    l2: f64,
    state: LinearState,
}

impl LinearPriority {
    pub fn new(default_score: f64, learning_rate: f64, l2: f64) -> Self {
        let p = default_score.clamp(0.01, 0.99);
        let mut weights = vec![0.0; FEATURE_DIM];
        weights[0] = (p / (1.0 - p)).ln();
        Self {
            learning_rate,
            l2,
            state: LinearState { weights, updates: 0 },
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.state.weights
    }

    fn logit(&self, x: &[f64; FEATURE_DIM]) -> f64 {
        self.state.weights.iter().zip(x.iter()).map(|(w, v)| w * v).sum()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl PriorityModel for LinearPriority {
    fn kind(&self) -> &'static str {
        "linear"
    }

    fn predict(&self, features: &JobFeatures) -> f64 {
        sigmoid(self.logit(&features.vector()))
    }

    fn update(&mut self, features: &JobFeatures, reward: f64) {
        let x = features.vector();
        let error = sigmoid(self.logit(&x)) - reward.clamp(0.0, 1.0);
        for (i, w) in self.state.weights.iter_mut().enumerate() {
            // No decay on the bias
            let penalty = if i == 0 { 0.0 } else { self.l2 * *w };
            *w -= self.learning_rate * (error * x[i] + penalty);
        }
        self.state.updates += 1;
    }

    fn state(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null)
    }

    fn load_state(&mut self, state: serde_json::Value) -> Result<()> {
        if state.is_null() {
            return Ok(());
        }
        let loaded: LinearState = serde_json::from_value(state)?;
        if loaded.weights.len() != FEATURE_DIM {
            return Err(crate::error::SchedulerError::Validation(format!(
                "linear model expects {} weights, snapshot has {}",
                FEATURE_DIM,
                loaded.weights.len()
            )));
        }
        self.state = loaded;
        Ok(())
    }
}
