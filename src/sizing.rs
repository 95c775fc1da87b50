//! Position sizing and leverage.
//!
//! Sizes are fractions of capital. Every output satisfies
//! `0 <= size <= max_position_pct` and `1 <= leverage <= max_leverage`.

use std::sync::Arc;

use crate::adapter::MarginAuthority;
use crate::allocation::AllocationEngine;
use crate::config::SizerConfig;
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use crate::types::{ActionType, Decision, MarketState};

// =============================================================================
// Sizing functions
// =============================================================================

/// Linear scale-down once volatility passes `threshold`, floored at `floor`.
pub fn volatility_scale(volatility: f64, threshold: f64, floor: f64) -> f64 {
    let floor = if floor.is_finite() { floor.clamp(0.0, 1.0) } else { 0.0 };
    if !volatility.is_finite() {
        return floor;
    }
    if threshold <= 0.0 || volatility <= threshold {
        return 1.0;
    }
    (1.0 - (volatility - threshold) / threshold).clamp(floor, 1.0)
}

/// Leverage wanted for a given consensus, before margin approval.
pub fn target_leverage(consensus: f64, volatility: f64, cfg: &SizerConfig) -> f64 {
    if !consensus.is_finite() || consensus <= cfg.high_confidence {
        return 1.0;
    }
    let mut lev = 1.0 + consensus.min(1.0) * (cfg.max_leverage - 1.0);
    if !(volatility <= cfg.volatility_threshold) {
        lev *= cfg.volatile_leverage_haircut;
    }
    lev.clamp(1.0, cfg.max_leverage.max(1.0))
}

/// Capped, volatility-scaled size for an allocation fraction.
pub fn bounded_size(allocation: f64, volatility: f64, cfg: &SizerConfig) -> f64 {
    if !allocation.is_finite() || allocation <= 0.0 {
        return 0.0;
    }
    let cap = cfg.max_position_pct.max(0.0);
    let scale = volatility_scale(volatility, cfg.volatility_threshold, cfg.volatility_scale_floor);
    (allocation.min(cap) * scale).clamp(0.0, cap)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPlan {
    pub size: f64,
    pub leverage: f64,
    /// Borrowed notional the plan needs granted; 0 when unlevered
    pub margin_amount: f64,
}

// =============================================================================
// Risk sizer
// =============================================================================

pub struct RiskSizer {
    cfg: SizerConfig,
    allocation: Arc<AllocationEngine>,
    margin: Arc<dyn MarginAuthority>,
}

impl RiskSizer {
    pub fn new(cfg: SizerConfig, allocation: Arc<AllocationEngine>, margin: Arc<dyn MarginAuthority>) -> Self {
        Self {
            cfg,
            allocation,
            margin,
        }
    }

    /// What the sizer would do with unlimited margin.
    pub fn plan(&self, consensus: f64, market: &MarketState, capital: f64) -> SizingPlan {
        let size = bounded_size(
            self.allocation.compute_allocation_fraction(),
            market.volatility,
            &self.cfg,
        );
        if size <= 0.0 {
            return SizingPlan {
                size: 0.0,
                leverage: 1.0,
                margin_amount: 0.0,
            };
        }
        let leverage = target_leverage(consensus, market.volatility, &self.cfg);
        SizingPlan {
            size,
            leverage,
            margin_amount: size * capital.max(0.0) * (leverage - 1.0),
        }
    }

    /// Fill size and leverage on an approved decision; anything else passes through flat.
    pub async fn size(&self, mut decision: Decision, market: &MarketState, capital: f64) -> Decision {
        if !decision.is_approved() || decision.action.action_type == ActionType::Hold {
            decision.action.size = 0.0;
            decision.action.leverage = 1.0;
            return decision;
        }

        let plan = self.plan(decision.consensus_confidence, market, capital);
        let mut leverage = plan.leverage;
        if leverage > 1.0 {
            match self.margin.request_leverage(plan.margin_amount).await {
                Ok(true) => {}
                Ok(false) => {
                    log_margin_degrade(plan, "refused");
                    leverage = 1.0;
                }
                Err(err) => {
                    log_margin_degrade(plan, &format!("{:#}", err));
                    leverage = 1.0;
                }
            }
        }

        decision.action.size = plan.size;
        decision.action.leverage = leverage;
        if plan.size <= 0.0 {
            decision.reasons.push("allocation is zero".to_string());
        } else {
            decision
                .reasons
                .push(format!("size {:.4} leverage {:.2}", plan.size, leverage));
        }
        decision
    }
}

fn log_margin_degrade(plan: SizingPlan, why: &str) {
    logging::log(
        Level::Warn,
        Domain::Risk,
        "margin_degraded",
        obj(&[
            ("msg", v_str("leverage forced to 1")),
            ("requested_leverage", v_num(plan.leverage)),
            ("margin_amount", v_num(plan.margin_amount)),
            ("cause", v_str(why)),
        ]),
    );
}
