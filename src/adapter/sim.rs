//! Seeded in-process collaborators for paper trading and tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use super::{MarginAuthority, MarketDataSource, Quote, QuoteSource};
use crate::types::{MarketState, Regime, Side};

/// Standard normal draw (Box-Muller).
pub fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

pub fn ema_alpha(period: f64) -> f64 {
    2.0 / (period + 1.0)
}

// =============================================================================
// Market
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimMarketConfig {
    pub symbol: String,
    pub start_price: f64,
    pub start_ts: i64,
    pub step_secs: i64,
    /// Per-step drift and gaussian shock, as return fractions
    pub drift: f64,
    pub step_vol: f64,
    /// Steps per volatility horizon (96 x 15m = one day)
    pub vol_horizon_steps: f64,
    pub ema_fast_period: f64,
    pub ema_slow_period: f64,
    pub base_mev_risk: f64,
    pub mev_spike_prob: f64,
    pub base_latency_ms: f64,
    pub latency_jitter_ms: f64,
    pub base_volume: f64,
    pub failure_rate: f64,
    pub seed: u64,
}

impl Default for SimMarketConfig {
    fn default() -> Self {
        Self {
            symbol: "SOL/USD".to_string(),
            start_price: 150.0,
            start_ts: 1_700_000_000,
            step_secs: 900,
            drift: 0.0002,
            step_vol: 0.002,
            vol_horizon_steps: 96.0,
            ema_fast_period: 5.0,
            ema_slow_period: 20.0,
            base_mev_risk: 0.2,
            mev_spike_prob: 0.05,
            base_latency_ms: 120.0,
            latency_jitter_ms: 80.0,
            base_volume: 250_000.0,
            failure_rate: 0.0,
            seed: 42,
        }
    }
}

#[derive(Debug)]
struct Walk {
    rng: StdRng,
    step: i64,
    price: f64,
    ema_fast: f64,
    ema_slow: f64,
    ewma_r2: f64,
}

/// Gaussian random walk with EMAs, volatility and regime derived per step.
#[derive(Debug)]
pub struct SimulatedMarket {
    cfg: SimMarketConfig,
    walk: Mutex<Walk>,
}

impl SimulatedMarket {
    pub fn new(cfg: SimMarketConfig) -> Self {
        let walk = Walk {
            rng: StdRng::seed_from_u64(cfg.seed),
            step: 0,
            price: cfg.start_price,
            ema_fast: cfg.start_price,
            ema_slow: cfg.start_price,
            ewma_r2: cfg.step_vol * cfg.step_vol,
        };
        Self {
            cfg,
            walk: Mutex::new(walk),
        }
    }

    fn next_state(&self) -> Result<MarketState> {
        let mut w = self.walk.lock().unwrap_or_else(PoisonError::into_inner);
        let cfg = &self.cfg;

        if cfg.failure_rate > 0.0 && w.rng.gen::<f64>() < cfg.failure_rate {
            w.step += 1;
            return Err(anyhow!("simulated feed timeout at step {}", w.step));
        }

        let shock = standard_normal(&mut w.rng);
        let ret = cfg.drift + cfg.step_vol * shock;
        w.price = (w.price * (1.0 + ret)).max(0.01);
        w.ema_fast += ema_alpha(cfg.ema_fast_period) * (w.price - w.ema_fast);
        w.ema_slow += ema_alpha(cfg.ema_slow_period) * (w.price - w.ema_slow);
        w.ewma_r2 += 0.06 * (ret * ret - w.ewma_r2);
        w.step += 1;

        let volatility = (w.ewma_r2 * cfg.vol_horizon_steps).sqrt();
        let trend = (w.ema_fast - w.ema_slow) / w.ema_slow;
        let regime = Regime::classify(Some(trend), volatility, 0.002, 0.05);

        let mev = if w.rng.gen::<f64>() < cfg.mev_spike_prob {
            w.rng.gen_range(0.75..1.0)
        } else {
            w.rng.gen_range(0.0..(cfg.base_mev_risk * 2.0).clamp(0.01, 1.0))
        };
        let half_spread = w.price * 0.0001;
        let ts = DateTime::from_timestamp(cfg.start_ts, 0).unwrap_or_else(Utc::now)
            + Duration::seconds(cfg.step_secs * w.step);

        Ok(MarketState {
            timestamp: ts,
            symbol: cfg.symbol.clone(),
            price: w.price,
            bid: w.price - half_spread,
            ask: w.price + half_spread,
            volume_24h: cfg.base_volume * w.rng.gen_range(0.5..1.5),
            ema_fast: w.ema_fast,
            ema_slow: w.ema_slow,
            regime,
            volatility,
            liquidity_score: w.rng.gen_range(0.6..1.0),
            mev_risk_score: mev,
            latency_ms: cfg.base_latency_ms + w.rng.gen_range(0.0..cfg.latency_jitter_ms.max(1.0)),
        })
    }
}

#[async_trait]
impl MarketDataSource for SimulatedMarket {
    async fn fetch(&self) -> Result<MarketState> {
        self.next_state()
    }
}

// =============================================================================
// Quotes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimQuoteConfig {
    pub base_slippage: f64,
    /// Notional that moves the price by 100%
    pub depth_notional: f64,
    pub noise_pct: f64,
    pub latency_ms: f64,
    pub failure_rate: f64,
    pub seed: u64,
}

impl Default for SimQuoteConfig {
    fn default() -> Self {
        Self {
            base_slippage: 0.0005,
            depth_notional: 1_000_000.0,
            noise_pct: 0.0005,
            latency_ms: 40.0,
            failure_rate: 0.0,
            seed: 13,
        }
    }
}

#[derive(Debug)]
struct QuoteBook {
    rng: StdRng,
    reference: f64,
}

/// Quotes around a reference price the driver moves with each snapshot.
#[derive(Debug)]
pub struct SimulatedQuotes {
    cfg: SimQuoteConfig,
    book: Mutex<QuoteBook>,
}

impl SimulatedQuotes {
    pub fn new(cfg: SimQuoteConfig, reference: f64) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            book: Mutex::new(QuoteBook { rng, reference }),
        }
    }

    pub fn set_reference(&self, price: f64) {
        self.book.lock().unwrap_or_else(PoisonError::into_inner).reference = price;
    }
}

#[async_trait]
impl QuoteSource for SimulatedQuotes {
    async fn quote(&self, notional: f64, side: Side) -> Result<Quote> {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cfg.failure_rate > 0.0 && book.rng.gen::<f64>() < self.cfg.failure_rate {
            return Err(anyhow!("quote request timed out"));
        }
        if !(book.reference > 0.0) {
            return Err(anyhow!("no reference price"));
        }
        let impact = self.cfg.base_slippage + notional.max(0.0) / self.cfg.depth_notional.max(1.0);
        let noise = self.cfg.noise_pct * standard_normal(&mut book.rng);
        let price = book.reference * (1.0 + side.sign() * (impact + noise));
        let latency_ms = self.cfg.latency_ms * book.rng.gen_range(0.5..1.5);
        Ok(Quote {
            price,
            expected_slippage: impact,
            latency_ms,
        })
    }
}

// =============================================================================
// Margin
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct FixedMargin {
    max_amount: f64,
    reachable: bool,
}

impl FixedMargin {
    /// Grants any request up to `max_amount`.
    pub fn granting(max_amount: f64) -> Self {
        Self {
            max_amount,
            reachable: true,
        }
    }

    pub fn refusing() -> Self {
        Self::granting(0.0)
    }

    /// Every request errors.
    pub fn unavailable() -> Self {
        Self {
            max_amount: 0.0,
            reachable: false,
        }
    }
}

#[async_trait]
impl MarginAuthority for FixedMargin {
    async fn request_leverage(&self, amount: f64) -> Result<bool> {
        if !self.reachable {
            return Err(anyhow!("margin service unreachable"));
        }
        Ok(amount > 0.0 && amount <= self.max_amount)
    }
}
