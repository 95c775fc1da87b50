//! MEV-protected bundle submission model.
//!
//! Latency, inclusion and slippage are drawn from a seeded RNG so a replay
//! with the same seed yields the same fills.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

use super::ExecutionStrategy;
use crate::adapter::sim::standard_normal;
use crate::config::BundleConfig;
use crate::types::{Action, ExecutionReport, MarketState, Venue};

const LAMPORTS_PER_SOL: f64 = 1e9;

#[derive(Debug)]
pub struct BundleStrategy {
    cfg: BundleConfig,
    rng: Mutex<StdRng>,
}

impl BundleStrategy {
    pub fn new(cfg: BundleConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng: Mutex::new(rng),
        }
    }

    /// Falls with a smaller tip and a busier mempool.
    pub fn inclusion_probability(&self, mev_risk: f64) -> f64 {
        let c = &self.cfg;
        let tip_term = 0.5 + c.tip_lamports / (c.tip_lamports + c.reference_tip_lamports).max(1.0);
        let congestion = 1.0 - c.congestion_weight * mev_risk.clamp(0.0, 1.0);
        (c.base_inclusion * tip_term * congestion).clamp(0.0, 1.0)
    }

    /// Expected slippage before the random multiplier.
    pub fn base_slippage(&self, action: &Action, liquidity: f64) -> f64 {
        let c = &self.cfg;
        c.base_slippage * (1.0 + action.size * action.leverage * c.size_impact) / liquidity.max(0.05)
    }

    pub fn fees(&self, price: f64) -> f64 {
        (self.cfg.tip_lamports + self.cfg.network_fee_lamports) / LAMPORTS_PER_SOL * price
    }
}

#[async_trait]
impl ExecutionStrategy for BundleStrategy {
    fn venue(&self) -> Venue {
        Venue::Jito
    }

    async fn submit(&self, action: &Action, market: &MarketState, _capital: f64) -> Result<ExecutionReport> {
        let side = match action.action_type.side() {
            Some(side) if action.size > 0.0 => side,
            _ => return Ok(ExecutionReport::not_sent("nothing to execute")),
        };
        if !(market.price > 0.0) || !market.price.is_finite() {
            bail!("no usable price for {}", market.symbol);
        }

        // fixed draw order: latency, inclusion, slippage
        let (latency_ms, included, slip_mult) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let latency = (self.cfg.latency_mean_ms + self.cfg.latency_spread_ms * standard_normal(&mut rng))
                .max(self.cfg.latency_floor_ms);
            let included = rng.gen::<f64>() < self.inclusion_probability(market.mev_risk_score);
            let mult = rng.gen_range(0.8..1.2);
            (latency, included, mult)
        };

        let mut report = ExecutionReport {
            filled: false,
            fill_price: 0.0,
            realized_slippage: 0.0,
            fees_paid: 0.0,
            latency_ms,
            venue: Venue::Jito,
            side: Some(side),
            leverage: action.leverage,
            requested_size: action.size,
            filled_size: 0.0,
            slices_executed: 0,
            slices_aborted: 0,
            note: None,
        };

        if !included {
            report.note = Some("bundle not included".to_string());
            return Ok(report);
        }

        let slippage = self.base_slippage(action, market.liquidity_score) * slip_mult;
        report.filled = true;
        report.fill_price = market.price * (1.0 + side.sign() * slippage);
        report.realized_slippage = slippage;
        report.fees_paid = self.fees(market.price);
        report.filled_size = action.size;
        report.slices_executed = 1;
        Ok(report)
    }
}
