//! Tabular Q-learning engine.
//!
//! Market snapshots are discretized into a small `StateKey`; the Q-table maps
//! each key to one value per `ActionType`. Actions are picked epsilon-greedy
//! from a seeded RNG so runs replay exactly.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use crate::config::LearningConfig;
use crate::consensus::ScoringEngine;
use crate::types::{ActionType, EngineVote, MarketState, Regime};

pub const ENGINE_NAME: &str = "learning";

// =============================================================================
// State space
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MomentumBucket {
    Down,
    Flat,
    Up,
}

impl MomentumBucket {
    /// Bins the EMA crossover against a symmetric band.
    pub fn from_signal(signal: Option<f64>, band: f64) -> Self {
        match signal {
            Some(s) if s > band => Self::Up,
            Some(s) if s < -band => Self::Down,
            _ => Self::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
}

impl VolatilityBucket {
    pub fn from_volatility(vol: f64, low: f64, high: f64) -> Self {
        match vol {
            v if v < low => Self::Low,
            v if v < high => Self::Normal,
            // NaN lands here too
            _ => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StateKey {
    pub momentum: MomentumBucket,
    pub volatility: VolatilityBucket,
    pub regime: Regime,
}

/// Upper bound on Q-table rows: every momentum x volatility x regime key.
pub const MAX_STATES: usize = 3 * 3 * Regime::ALL.len();

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LearningSnapshot {
    pub epsilon: f64,
    pub updates: u64,
    pub states: usize,
}

#[derive(Debug)]
struct QState {
    table: HashMap<StateKey, [f64; 3]>,
    epsilon: f64,
    updates: u64,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug)]
pub struct LearningEngine {
    cfg: LearningConfig,
    q: RwLock<QState>,
    rng: Mutex<StdRng>,
}

impl LearningEngine {
    pub fn new(cfg: LearningConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        let epsilon = cfg.epsilon;
        Self {
            cfg,
            q: RwLock::new(QState {
                table: HashMap::new(),
                epsilon,
                updates: 0,
            }),
            rng: Mutex::new(rng),
        }
    }

    pub fn state_key(&self, m: &MarketState) -> StateKey {
        StateKey {
            momentum: MomentumBucket::from_signal(m.trend_signal(), self.cfg.momentum_band),
            volatility: VolatilityBucket::from_volatility(
                m.volatility,
                self.cfg.vol_low,
                self.cfg.vol_high,
            ),
            regime: m.regime,
        }
    }

    /// Values for `key`; unseen keys read as zeros and are not inserted.
    pub fn q_values(&self, key: &StateKey) -> [f64; 3] {
        let q = self.q.read().unwrap_or_else(PoisonError::into_inner);
        q.table.get(key).copied().unwrap_or([0.0; 3])
    }

    pub fn epsilon(&self) -> f64 {
        self.q.read().unwrap_or_else(PoisonError::into_inner).epsilon
    }

    pub fn snapshot(&self) -> LearningSnapshot {
        let q = self.q.read().unwrap_or_else(PoisonError::into_inner);
        LearningSnapshot {
            epsilon: q.epsilon,
            updates: q.updates,
            states: q.table.len(),
        }
    }

    /// Q[s,a] += lr * (reward + discount * max Q[s'] - Q[s,a])
    pub fn update(&self, state: StateKey, action: ActionType, reward: f64, next: StateKey) {
        self.apply_update(state, action, reward, Some(next));
    }

    /// Update for an episode end: the target is the reward alone.
    pub fn update_terminal(&self, state: StateKey, action: ActionType, reward: f64) {
        self.apply_update(state, action, reward, None);
    }

    fn apply_update(&self, state: StateKey, action: ActionType, reward: f64, next: Option<StateKey>) {
        if !reward.is_finite() {
            return;
        }
        let mut q = self.q.write().unwrap_or_else(PoisonError::into_inner);
        let future = match next {
            Some(key) => {
                let row = *q.table.entry(key).or_insert([0.0; 3]);
                self.cfg.discount * max_value(&row)
            }
            None => 0.0,
        };
        let row = q.table.entry(state).or_insert([0.0; 3]);
        let i = action.index();
        row[i] += self.cfg.learning_rate * (reward + future - row[i]);
        q.epsilon = (q.epsilon * self.cfg.epsilon_decay).max(self.cfg.min_epsilon);
        q.updates += 1;
    }

    fn choose(&self, key: &StateKey) -> (ActionType, f64) {
        let (values, epsilon) = {
            let q = self.q.read().unwrap_or_else(PoisonError::into_inner);
            (q.table.get(key).copied().unwrap_or([0.0; 3]), q.epsilon)
        };

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.gen::<f64>() < epsilon {
            let pick = ActionType::ALL[rng.gen_range(0..ActionType::ALL.len())];
            return (pick, self.cfg.explore_confidence);
        }
        drop(rng);

        let (best, gap) = greedy(&values);
        let confidence = if gap > 0.0 {
            gap / (gap + self.cfg.gap_scale)
        } else {
            0.0
        };
        (best, confidence.clamp(0.01, 0.99))
    }
}

fn max_value(row: &[f64; 3]) -> f64 {
    row.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Best action (first in priority order on ties) and its margin over the runner-up.
fn greedy(row: &[f64; 3]) -> (ActionType, f64) {
    let mut best = 0;
    for i in 1..row.len() {
        if row[i] > row[best] {
            best = i;
        }
    }
    let runner_up = row
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != best)
        .map(|(_, v)| *v)
        .fold(f64::NEG_INFINITY, f64::max);
    (ActionType::ALL[best], row[best] - runner_up)
}

impl ScoringEngine for LearningEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn score(&self, market: &MarketState) -> Result<EngineVote> {
        let key = self.state_key(market);
        let (action, confidence) = self.choose(&key);
        Ok(EngineVote::new(ENGINE_NAME, action, confidence))
    }
}
