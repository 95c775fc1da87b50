//! Historical bar replay.
//!
//! Rows are `ts,open,high,low,close,volume`. EMAs, volatility, regime and the
//! microstructure fields are derived bar by bar so the replay feeds the same
//! `MarketState` shape the live path does.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::sim::ema_alpha;
use super::MarketDataSource;
use crate::types::{MarketState, Regime};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

pub fn parse_bar_line(line: &str) -> Result<Bar> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 6 {
        return Err(anyhow!("expected 6 columns, got {}", parts.len()));
    }
    Ok(Bar {
        ts: parts[0].trim().parse()?,
        o: parts[1].trim().parse()?,
        h: parts[2].trim().parse()?,
        l: parts[3].trim().parse()?,
        c: parts[4].trim().parse()?,
        v: parts[5].trim().parse()?,
    })
}

/// Loads a bar file, skipping blanks, comments and a header. Returns bars and the bad-row count.
pub fn load_bars(path: impl AsRef<Path>) -> Result<(Vec<Bar>, usize)> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut bars = Vec::new();
    let mut bad = 0;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.to_lowercase().starts_with("ts,") {
            continue;
        }
        match parse_bar_line(trimmed) {
            Ok(b) => bars.push(b),
            Err(_) => bad += 1,
        }
    }
    Ok((bars, bad))
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub symbol: String,
    pub ema_fast_period: f64,
    pub ema_slow_period: f64,
    /// Bars per volatility and volume horizon
    pub horizon_bars: usize,
    /// Volume at which liquidity saturates at 1
    pub liquidity_volume: f64,
    pub latency_ms: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            symbol: "SOL/USD".to_string(),
            ema_fast_period: 5.0,
            ema_slow_period: 20.0,
            horizon_bars: 96,
            liquidity_volume: 1_000_000.0,
            latency_ms: 100.0,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    next: usize,
    ema_fast: f64,
    ema_slow: f64,
    ewma_r2: f64,
    prev_close: Option<f64>,
    volumes: VecDeque<f64>,
}

pub struct ReplayMarket {
    cfg: ReplayConfig,
    bars: Vec<Bar>,
    cursor: Mutex<Cursor>,
}

impl ReplayMarket {
    pub fn new(cfg: ReplayConfig, bars: Vec<Bar>) -> Self {
        let first = bars.first().map(|b| b.c).unwrap_or(0.0);
        Self {
            cfg,
            bars,
            cursor: Mutex::new(Cursor {
                next: 0,
                ema_fast: first,
                ema_slow: first,
                ewma_r2: 0.0,
                prev_close: None,
                volumes: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    fn advance(&self) -> Result<MarketState> {
        let mut cur = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = *self
            .bars
            .get(cur.next)
            .ok_or_else(|| anyhow!("replay exhausted after {} bars", self.bars.len()))?;
        cur.next += 1;

        if let Some(prev) = cur.prev_close.filter(|p| *p > 0.0) {
            let r = (bar.c / prev).ln();
            if r.is_finite() {
                cur.ewma_r2 += (2.0 / (self.cfg.horizon_bars as f64 + 1.0)) * (r * r - cur.ewma_r2);
            }
        }
        cur.prev_close = Some(bar.c);
        cur.ema_fast += ema_alpha(self.cfg.ema_fast_period) * (bar.c - cur.ema_fast);
        cur.ema_slow += ema_alpha(self.cfg.ema_slow_period) * (bar.c - cur.ema_slow);
        cur.volumes.push_back(bar.v);
        while cur.volumes.len() > self.cfg.horizon_bars.max(1) {
            cur.volumes.pop_front();
        }
        let volume_24h: f64 = cur.volumes.iter().sum();

        let volatility = (cur.ewma_r2 * self.cfg.horizon_bars as f64).sqrt();
        let trend = if cur.ema_slow > 0.0 {
            Some((cur.ema_fast - cur.ema_slow) / cur.ema_slow)
        } else {
            None
        };
        let range_pct = if bar.c > 0.0 { (bar.h - bar.l) / bar.c } else { 1.0 };
        let half_spread = bar.c * 0.0001;

        Ok(MarketState {
            timestamp: DateTime::from_timestamp(bar.ts, 0).unwrap_or_else(Utc::now),
            symbol: self.cfg.symbol.clone(),
            price: bar.c,
            bid: bar.c - half_spread,
            ask: bar.c + half_spread,
            volume_24h,
            ema_fast: cur.ema_fast,
            ema_slow: cur.ema_slow,
            regime: Regime::classify(trend, volatility, 0.002, 0.05),
            volatility,
            liquidity_score: (volume_24h / self.cfg.liquidity_volume.max(1.0)).clamp(0.0, 1.0),
            mev_risk_score: (0.1 + 20.0 * range_pct).clamp(0.0, 1.0),
            latency_ms: self.cfg.latency_ms,
        })
    }
}

#[async_trait]
impl MarketDataSource for ReplayMarket {
    async fn fetch(&self) -> Result<MarketState> {
        self.advance()
    }
}
