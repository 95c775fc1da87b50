//! Admission filter.
//!
//! A pure predicate over one `MarketState`. Every check runs on every call so
//! the caller always sees the complete list of violations.

use crate::config::GateConfig;
use crate::types::MarketState;

/// Verdict of one admission pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub allowed: bool,
    pub reasons: Vec<String>,
    /// Weighted sum of violated checks, capped at 1.
    pub risk_score: f64,
}

impl GateVerdict {
    pub fn is_blocked(&self) -> bool {
        !self.allowed
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    cfg: GateConfig,
}

const W_MEV: f64 = 0.3;
const W_LATENCY: f64 = 0.2;
const W_VOLUME: f64 = 0.2;
const W_SPREAD: f64 = 0.1;
const W_EMA: f64 = 0.2;
const W_QUOTE: f64 = 0.2;

impl AdmissionFilter {
    pub fn new(cfg: GateConfig) -> Self {
        Self { cfg }
    }

    pub fn evaluate(&self, m: &MarketState) -> GateVerdict {
        let mut reasons = Vec::new();
        let mut risk = 0.0;

        // NaN fails every `<=` comparison, so the negated forms below reject it
        if !(m.mev_risk_score <= self.cfg.max_mev_risk) {
            reasons.push(format!(
                "MEV risk too high: {:.3} > {:.3}",
                m.mev_risk_score, self.cfg.max_mev_risk
            ));
            risk += W_MEV;
        }

        if !(m.latency_ms <= self.cfg.max_latency_ms) {
            reasons.push(format!(
                "latency too high: {:.0}ms > {:.0}ms",
                m.latency_ms, self.cfg.max_latency_ms
            ));
            risk += W_LATENCY;
        }

        if !(m.volume_24h >= self.cfg.min_volume_24h) {
            reasons.push(format!(
                "24h volume too low: {:.2} < {:.2}",
                m.volume_24h, self.cfg.min_volume_24h
            ));
            risk += W_VOLUME;
        }

        match spread_pct(m) {
            Some(spread) if spread <= self.cfg.max_spread_pct => {}
            Some(spread) => {
                reasons.push(format!(
                    "spread too wide: {:.4} > {:.4}",
                    spread, self.cfg.max_spread_pct
                ));
                risk += W_SPREAD;
            }
            None => {
                reasons.push("spread undefined: non-positive price".to_string());
                risk += W_SPREAD;
            }
        }

        match ema_deviation_pct(m) {
            Some(dev) if dev <= self.cfg.max_ema_deviation_pct => {}
            Some(dev) => {
                reasons.push(format!(
                    "price deviates from fast EMA: {:.4} > {:.4}",
                    dev, self.cfg.max_ema_deviation_pct
                ));
                risk += W_EMA;
            }
            None => {
                reasons.push("fast EMA unusable".to_string());
                risk += W_EMA;
            }
        }

        if !quote_is_consistent(m) {
            reasons.push(format!(
                "quote inconsistent: bid {} price {} ask {}",
                m.bid, m.price, m.ask
            ));
            risk += W_QUOTE;
        }

        GateVerdict {
            allowed: reasons.is_empty(),
            reasons,
            risk_score: f64::min(risk, 1.0),
        }
    }
}

fn spread_pct(m: &MarketState) -> Option<f64> {
    if !(m.price > 0.0) {
        return None;
    }
    let s = (m.ask - m.bid).abs() / m.price;
    s.is_finite().then_some(s)
}

fn ema_deviation_pct(m: &MarketState) -> Option<f64> {
    if !(m.ema_fast > 0.0) {
        return None;
    }
    let d = (m.price - m.ema_fast).abs() / m.ema_fast;
    d.is_finite().then_some(d)
}

/// Finite, positive price inside the book.
fn quote_is_consistent(m: &MarketState) -> bool {
    m.price.is_finite()
        && m.price > 0.0
        && m.bid.is_finite()
        && m.ask.is_finite()
        && m.bid <= m.price
        && m.price <= m.ask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> AdmissionFilter {
        AdmissionFilter::new(GateConfig::default())
    }

    #[test]
    fn test_quiet_market_allowed() {
        let v = filter().evaluate(&MarketState::quiet("SOL/USD", 150.0));
        assert!(v.allowed, "reasons: {:?}", v.reasons);
        assert_eq!(v.risk_score, 0.0);
    }

    #[test]
    fn test_mev_risk_blocks_with_reason() {
        let mut m = MarketState::quiet("SOL/USD", 150.0);
        m.mev_risk_score = 0.9;
        let v = filter().evaluate(&m);
        assert!(v.is_blocked());
        assert_eq!(v.reasons.len(), 1);
        assert!(v.reasons[0].contains("MEV"));
        assert!((v.risk_score - W_MEV).abs() < 1e-12);
    }

    #[test]
    fn test_all_violations_reported() {
        let mut m = MarketState::quiet("SOL/USD", 150.0);
        m.mev_risk_score = 0.95;
        m.latency_ms = 2000.0;
        m.volume_24h = 10.0;
        m.bid = 140.0;
        m.ask = 160.0;
        m.ema_fast = 100.0;
        let v = filter().evaluate(&m);
        assert_eq!(v.reasons.len(), 5, "{:?}", v.reasons);
        assert!((v.risk_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossed_book_is_a_block_not_a_panic() {
        let mut m = MarketState::quiet("SOL/USD", 150.0);
        m.bid = 151.0;
        m.ask = 150.5;
        let v = filter().evaluate(&m);
        assert!(v.is_blocked());
        assert!(v.reasons.iter().any(|r| r.starts_with("quote inconsistent")));
    }

    #[test]
    fn test_zero_price_fails_checks() {
        let mut m = MarketState::quiet("SOL/USD", 150.0);
        m.price = 0.0;
        m.bid = 0.0;
        m.ask = 0.0;
        let v = filter().evaluate(&m);
        assert!(v.is_blocked());
        assert!(v.reasons.iter().any(|r| r.contains("spread undefined")));
    }

    #[test]
    fn test_nan_mev_blocks() {
        let mut m = MarketState::quiet("SOL/USD", 150.0);
        m.mev_risk_score = f64::NAN;
        assert!(filter().evaluate(&m).is_blocked());
    }
}
