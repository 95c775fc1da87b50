//! Performance tracking and the persisted metrics document.
//!
//! The document is the only state an external health check reads. It is
//! rewritten whole on every update (temp file + rename).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::breaker::{BreakerState, TripReason};
use crate::logging::ts_now;
use crate::types::{Decision, DecisionStatus};

/// Keys a health check insists on.
pub const REQUIRED_KEYS: [&str; 7] = [
    "mode",
    "cycle_count",
    "total_trades",
    "win_rate",
    "total_pnl",
    "return_pct",
    "current_capital",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockedCounts {
    pub filter: u64,
    pub confidence: u64,
    pub circuit_breaker: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub mode: String,
    pub cycle_count: u64,
    pub total_trades: u64,
    pub winning_trades: u64,
    /// Percent
    pub win_rate: f64,
    pub total_pnl: f64,
    pub return_pct: f64,
    pub current_capital: f64,
    pub max_drawdown_pct: f64,
    pub blocked: BlockedCounts,
    pub approval_rate: f64,
    pub circuit_breaker_status: BreakerState,
    pub trip_reason: Option<TripReason>,
    pub last_updated: String,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    mode: String,
    initial_capital: f64,
    current_capital: f64,
    peak_capital: f64,
    max_drawdown: f64,
    cycles: u64,
    approved: u64,
    blocked: BlockedCounts,
    trades: u64,
    wins: u64,
    total_pnl: f64,
}

impl PerformanceTracker {
    pub fn new(mode: &str, initial_capital: f64) -> Self {
        Self {
            mode: mode.to_string(),
            initial_capital,
            current_capital: initial_capital,
            peak_capital: initial_capital,
            max_drawdown: 0.0,
            cycles: 0,
            approved: 0,
            blocked: BlockedCounts::default(),
            trades: 0,
            wins: 0,
            total_pnl: 0.0,
        }
    }

    pub fn record_decision(&mut self, decision: &Decision) {
        self.cycles += 1;
        match decision.status {
            DecisionStatus::Approved => self.approved += 1,
            DecisionStatus::BlockedByFilter => self.blocked.filter += 1,
            DecisionStatus::BlockedByConfidence => self.blocked.confidence += 1,
            DecisionStatus::BlockedByCircuitBreaker => self.blocked.circuit_breaker += 1,
        }
    }

    /// One closed trade, PnL in quote currency.
    pub fn record_trade(&mut self, pnl: f64) {
        if !pnl.is_finite() {
            return;
        }
        self.trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
        }
        self.total_pnl += pnl;
        self.current_capital += pnl;
        if self.current_capital > self.peak_capital {
            self.peak_capital = self.current_capital;
        }
        if self.peak_capital > 0.0 {
            let dd = (self.peak_capital - self.current_capital) / self.peak_capital;
            self.max_drawdown = self.max_drawdown.max(dd);
        }
    }

    pub fn trades(&self) -> u64 {
        self.trades
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn win_rate_pct(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }

    pub fn return_pct(&self) -> f64 {
        if self.initial_capital > 0.0 {
            (self.current_capital - self.initial_capital) / self.initial_capital * 100.0
        } else {
            0.0
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }

    pub fn document(&self, breaker: BreakerState, trip_reason: Option<TripReason>) -> MetricsDocument {
        MetricsDocument {
            mode: self.mode.clone(),
            cycle_count: self.cycles,
            total_trades: self.trades,
            winning_trades: self.wins,
            win_rate: self.win_rate_pct(),
            total_pnl: self.total_pnl,
            return_pct: self.return_pct(),
            current_capital: self.current_capital,
            max_drawdown_pct: self.max_drawdown * 100.0,
            blocked: self.blocked,
            approval_rate: if self.cycles == 0 {
                0.0
            } else {
                self.approved as f64 / self.cycles as f64
            },
            circuit_breaker_status: breaker,
            trip_reason,
            last_updated: ts_now(),
        }
    }
}

pub fn write_metrics(path: impl AsRef<Path>, doc: &MetricsDocument) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(doc)?;
    fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Fails on a missing file, malformed JSON or a missing required key.
pub fn check_health(path: impl AsRef<Path>) -> Result<MetricsDocument> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("metrics file not found: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw).context("invalid JSON in metrics file")?;
    let obj = match value.as_object() {
        Some(o) => o,
        None => bail!("metrics document is not a JSON object"),
    };
    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        bail!("invalid metrics format: missing {}", missing.join(", "));
    }
    let doc: MetricsDocument = serde_json::from_value(value).context("invalid metrics format")?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tracker() -> PerformanceTracker {
        let mut t = PerformanceTracker::new("paper", 100.0);
        t.record_decision(&Decision::blocked(DecisionStatus::BlockedByFilter, vec![]));
        t.record_decision(&Decision::blocked(DecisionStatus::BlockedByConfidence, vec![]));
        t.record_trade(5.0);
        t.record_trade(-10.0);
        t.record_trade(2.0);
        t
    }

    #[test]
    fn test_tracker_stats() {
        let t = make_tracker();
        assert_eq!(t.cycles(), 2);
        assert_eq!(t.trades(), 3);
        assert!((t.total_pnl() + 3.0).abs() < 1e-12);

        let doc = t.document(BreakerState::Armed, None);
        assert_eq!(doc.total_trades, 3);
        assert_eq!(doc.winning_trades, 2);
        assert!((doc.win_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((doc.total_pnl + 3.0).abs() < 1e-12);
        assert!((doc.return_pct + 3.0).abs() < 1e-9);
        assert!((doc.max_drawdown_pct - 10.0 / 105.0 * 100.0).abs() < 1e-9);
        assert_eq!(doc.blocked.filter, 1);
        assert_eq!(doc.approval_rate, 0.0);
    }

    #[test]
    fn test_write_then_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("performance_stats.json");
        let doc = make_tracker().document(BreakerState::Tripped, Some(TripReason::Drawdown));
        write_metrics(&path, &doc).unwrap();
        let back = check_health(&path).unwrap();
        assert_eq!(back, doc);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_health_rejects_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("performance_stats.json");
        assert!(check_health(&path).is_err());

        fs::write(&path, "{not json").unwrap();
        assert!(check_health(&path).is_err());

        fs::write(&path, r#"{"cycle_count": 3}"#).unwrap();
        let err = check_health(&path).unwrap_err().to_string();
        assert!(err.contains("mode"), "{}", err);
    }
}
