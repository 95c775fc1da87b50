//! Adaptive allocation engine.
//!
//! Votes from the EMA crossover and keeps EWMA estimates of realized trade
//! outcomes, which feed a fractional-Kelly allocation.

use anyhow::Result;
use serde::Serialize;
use std::sync::{PoisonError, RwLock};

use crate::config::AllocationConfig;
use crate::consensus::ScoringEngine;
use crate::types::{ActionType, EngineVote, MarketState, Regime};

pub const ENGINE_NAME: &str = "allocation";

/// EWMA outcome statistics. Mutated only by `record_outcome`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EwmaStats {
    pub win_rate: f64,
    pub avg_return: f64,
    /// EWMA of min(r, 0)^2
    pub downside_var: f64,
    pub trades: u64,
}

impl EwmaStats {
    fn update(&mut self, alpha: f64, ret: f64) {
        let win = if ret > 0.0 { 1.0 } else { 0.0 };
        let downside = ret.min(0.0).powi(2);
        if self.trades == 0 {
            // seed with the first observation instead of decaying from zero
            self.win_rate = win;
            self.avg_return = ret;
            self.downside_var = downside;
        } else {
            self.win_rate += alpha * (win - self.win_rate);
            self.avg_return += alpha * (ret - self.avg_return);
            self.downside_var += alpha * (downside - self.downside_var);
        }
        self.trades += 1;
    }
}

#[derive(Debug)]
pub struct AllocationEngine {
    cfg: AllocationConfig,
    stats: RwLock<EwmaStats>,
}

impl AllocationEngine {
    pub fn new(cfg: AllocationConfig) -> Self {
        Self {
            cfg,
            stats: RwLock::new(EwmaStats::default()),
        }
    }

    /// Restore from a previously captured snapshot.
    pub fn with_stats(cfg: AllocationConfig, stats: EwmaStats) -> Self {
        Self {
            cfg,
            stats: RwLock::new(stats),
        }
    }

    pub fn snapshot(&self) -> EwmaStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one realized trade return (PnL over deployed notional).
    pub fn record_outcome(&self, ret: f64) {
        if !ret.is_finite() {
            return;
        }
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.update(self.cfg.ewma_alpha, ret);
    }

    /// Fractional-Kelly allocation in [0, max_position_pct].
    pub fn compute_allocation_fraction(&self) -> f64 {
        let s = self.snapshot();
        let cap = self.cfg.max_position_pct;
        if s.trades == 0 {
            return self.cfg.min_allocation.min(cap).max(0.0);
        }
        if s.win_rate <= 0.5 || s.avg_return <= 0.0 {
            return 0.0;
        }
        let edge = (2.0 * s.win_rate - 1.0) * s.avg_return;
        let variance = s.downside_var.max(self.cfg.variance_floor);
        let f = self.cfg.kelly_fraction * edge / variance;
        if !f.is_finite() {
            return 0.0;
        }
        f.clamp(0.0, cap)
    }

    fn vote(&self, m: &MarketState) -> EngineVote {
        let signal = match m.trend_signal() {
            Some(s) => s,
            None => return EngineVote::new(ENGINE_NAME, ActionType::Hold, 0.5),
        };
        if signal.abs() < self.cfg.neutral_band {
            return EngineVote::new(ENGINE_NAME, ActionType::Hold, 0.5);
        }
        let action = if signal > 0.0 { ActionType::Buy } else { ActionType::Sell };
        let mut confidence = (signal.abs() / self.cfg.signal_scale).tanh();
        let contradicts = matches!(
            (action, m.regime),
            (ActionType::Buy, Regime::TrendingDown) | (ActionType::Sell, Regime::TrendingUp)
        );
        if contradicts {
            confidence *= 0.5;
        }
        EngineVote::new(ENGINE_NAME, action, confidence.clamp(0.01, 0.99))
    }
}

impl ScoringEngine for AllocationEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn score(&self, market: &MarketState) -> Result<EngineVote> {
        Ok(self.vote(market))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_engine() -> AllocationEngine {
        AllocationEngine::new(AllocationConfig::default())
    }

    fn trending(fast: f64, slow: f64, regime: Regime) -> MarketState {
        let mut m = MarketState::quiet("SOL/USD", 100.0);
        m.ema_fast = fast;
        m.ema_slow = slow;
        m.regime = regime;
        m
    }

    #[test]
    fn test_cold_start_uses_min_allocation() {
        let e = make_engine();
        assert_eq!(e.compute_allocation_fraction(), 0.01);
    }

    #[test]
    fn test_restore_from_snapshot() {
        let e = make_engine();
        for r in [0.02, -0.01, 0.03, 0.01, -0.005] {
            e.record_outcome(r);
        }
        let restored = AllocationEngine::with_stats(AllocationConfig::default(), e.snapshot());
        assert_eq!(restored.snapshot(), e.snapshot());
        assert_eq!(restored.compute_allocation_fraction(), e.compute_allocation_fraction());

        e.record_outcome(0.02);
        restored.record_outcome(0.02);
        assert_eq!(restored.snapshot(), e.snapshot());
    }

    #[test]
    fn test_losing_history_allocates_nothing() {
        let e = make_engine();
        for _ in 0..10 {
            e.record_outcome(-0.01);
        }
        assert_eq!(e.compute_allocation_fraction(), 0.0);
    }

    #[test]
    fn test_winning_history_capped() {
        let e = make_engine();
        for _ in 0..50 {
            e.record_outcome(0.02);
        }
        let f = e.compute_allocation_fraction();
        assert!(f > 0.0);
        assert!(f <= 0.35);
    }

    #[test]
    fn test_ewma_update_rule() {
        let e = make_engine();
        e.record_outcome(0.01);
        e.record_outcome(-0.02);
        let s = e.snapshot();
        // second update: 1 + 0.1 * (0 - 1)
        assert!((s.win_rate - 0.9).abs() < 1e-12);
        assert!((s.avg_return - (0.01 + 0.1 * (-0.02 - 0.01))).abs() < 1e-12);
        assert!((s.downside_var - 0.1 * 0.0004).abs() < 1e-12);
        assert_eq!(s.trades, 2);
    }

    #[test]
    fn test_non_finite_outcome_ignored() {
        let e = make_engine();
        e.record_outcome(f64::NAN);
        assert_eq!(e.snapshot().trades, 0);
    }

    #[test]
    fn test_vote_direction_and_confidence() {
        let e = make_engine();
        let up = e.score(&trending(101.0, 100.0, Regime::TrendingUp)).unwrap();
        assert_eq!(up.action_type, ActionType::Buy);
        assert!(up.confidence > 0.9);

        let down = e.score(&trending(99.0, 100.0, Regime::Ranging)).unwrap();
        assert_eq!(down.action_type, ActionType::Sell);
    }

    #[test]
    fn test_contradicting_regime_halves_confidence() {
        let e = make_engine();
        let aligned = e.score(&trending(100.3, 100.0, Regime::TrendingUp)).unwrap();
        let against = e.score(&trending(100.3, 100.0, Regime::TrendingDown)).unwrap();
        assert!((against.confidence - aligned.confidence * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_band_holds() {
        let e = make_engine();
        let v = e.score(&trending(100.01, 100.0, Regime::Ranging)).unwrap();
        assert_eq!(v.action_type, ActionType::Hold);
        assert_eq!(v.confidence, 0.5);

        let v = e.score(&trending(100.0, 0.0, Regime::Ranging)).unwrap();
        assert_eq!(v.action_type, ActionType::Hold);
    }
}
