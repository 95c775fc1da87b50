//! Capital circuit breaker.
//!
//! Two states: `Armed` and `Tripped`. A trip is sticky; only an operator
//! `reset()` re-arms it. While tripped no update touches the running totals.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakerState {
    Armed,
    Tripped,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Armed => "ARMED",
            BreakerState::Tripped => "TRIPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    Drawdown,
    DailyLoss,
    ConsecutiveLosses,
    CapitalExhausted,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripReason::Drawdown => "drawdown",
            TripReason::DailyLoss => "daily_loss",
            TripReason::ConsecutiveLosses => "consecutive_losses",
            TripReason::CapitalExhausted => "capital_exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub peak_capital: f64,
    pub current_capital: f64,
    pub consecutive_loss_count: u32,
    pub daily_loss_accum: f64,
    pub day_start_capital: f64,
    pub day: Option<NaiveDate>,
    pub tripped: bool,
    pub trip_reason: Option<TripReason>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        let capital = cfg.initial_capital;
        Self {
            cfg,
            state: CircuitBreakerState {
                peak_capital: capital,
                current_capital: capital,
                consecutive_loss_count: 0,
                daily_loss_accum: 0.0,
                day_start_capital: capital,
                day: None,
                tripped: false,
                trip_reason: None,
            },
        }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    pub fn status(&self) -> BreakerState {
        if self.state.tripped {
            BreakerState::Tripped
        } else {
            BreakerState::Armed
        }
    }

    pub fn allow(&self) -> bool {
        !self.state.tripped
    }

    pub fn capital(&self) -> f64 {
        self.state.current_capital
    }

    pub fn drawdown(&self) -> f64 {
        let s = &self.state;
        if s.peak_capital > 0.0 {
            ((s.peak_capital - s.current_capital) / s.peak_capital).max(0.0)
        } else {
            0.0
        }
    }

    pub fn daily_loss_pct(&self) -> f64 {
        if self.state.day_start_capital > 0.0 {
            self.state.daily_loss_accum / self.state.day_start_capital
        } else {
            0.0
        }
    }

    /// Apply one realized PnL (quote currency). Returns true if this update tripped the breaker.
    pub fn record_pnl(&mut self, pnl: f64, at: DateTime<Utc>) -> bool {
        if self.state.tripped || !pnl.is_finite() {
            return false;
        }

        let today = at.date_naive();
        let s = &mut self.state;
        if s.day != Some(today) {
            s.day = Some(today);
            s.daily_loss_accum = 0.0;
            s.day_start_capital = s.current_capital;
        }

        s.current_capital += pnl;
        if s.current_capital > s.peak_capital {
            s.peak_capital = s.current_capital;
        }
        if pnl < 0.0 {
            s.consecutive_loss_count += 1;
            s.daily_loss_accum += -pnl;
        } else if pnl > 0.0 {
            s.consecutive_loss_count = 0;
        }

        match self.check_limits() {
            Some(reason) => {
                self.trip(reason);
                true
            }
            None => false,
        }
    }

    fn check_limits(&self) -> Option<TripReason> {
        if self.state.current_capital <= 0.0 {
            return Some(TripReason::CapitalExhausted);
        }
        if self.drawdown() > self.cfg.drawdown {
            return Some(TripReason::Drawdown);
        }
        if self.daily_loss_pct() > self.cfg.max_daily_loss_pct {
            return Some(TripReason::DailyLoss);
        }
        if self.state.consecutive_loss_count >= self.cfg.consecutive_losses_limit {
            return Some(TripReason::ConsecutiveLosses);
        }
        None
    }

    fn trip(&mut self, reason: TripReason) {
        self.state.tripped = true;
        self.state.trip_reason = Some(reason);
        logging::log_breaker_trip(
            reason.as_str(),
            self.drawdown(),
            self.daily_loss_pct(),
            self.state.consecutive_loss_count,
        );
    }

    /// Operator re-arm. The high-water mark restarts at current capital.
    pub fn reset(&mut self) {
        let s = &mut self.state;
        s.tripped = false;
        s.trip_reason = None;
        s.consecutive_loss_count = 0;
        s.daily_loss_accum = 0.0;
        s.day_start_capital = s.current_capital;
        s.peak_capital = s.current_capital;
    }
}
