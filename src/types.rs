//! Shared value types passed between the decision stages.
//!
//! Everything here is a plain value: produced by one component, read by the
//! next, never mutated after it is returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Market snapshot
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    #[default]
    Unknown,
}

impl Regime {
    /// Tag from an EMA crossover and a volatility reading.
    pub fn classify(trend_signal: Option<f64>, volatility: f64, trend_band: f64, vol_high: f64) -> Self {
        if !volatility.is_finite() {
            return Regime::Unknown;
        }
        if volatility >= vol_high {
            return Regime::Volatile;
        }
        match trend_signal {
            Some(s) if s > trend_band => Regime::TrendingUp,
            Some(s) if s < -trend_band => Regime::TrendingDown,
            Some(_) => Regime::Ranging,
            None => Regime::Unknown,
        }
    }

    pub const ALL: [Regime; 5] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Ranging,
        Regime::Volatile,
        Regime::Unknown,
    ];
}

/// Immutable market snapshot produced by a `MarketDataSource`.
///
/// Nothing here is validated upstream: a crossed book or a zero price is a
/// legal value and must be rejected by the admission filter, not by a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume_24h: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub regime: Regime,
    pub volatility: f64,
    /// 0 = no depth, 1 = deep book
    pub liquidity_score: f64,
    /// 0 = quiet mempool, 1 = heavily contested
    pub mev_risk_score: f64,
    pub latency_ms: f64,
}

impl MarketState {
    /// A well-formed snapshot around `price` with a 2 bps spread and flat EMAs.
    pub fn quiet(symbol: &str, price: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            price,
            bid: price * 0.9999,
            ask: price * 1.0001,
            volume_24h: 100_000.0,
            ema_fast: price,
            ema_slow: price,
            regime: Regime::Ranging,
            volatility: 0.01,
            liquidity_score: 0.9,
            mev_risk_score: 0.1,
            latency_ms: 100.0,
        }
    }

    /// Relative EMA crossover, (fast - slow) / slow. `None` when EMAs are unusable.
    pub fn trend_signal(&self) -> Option<f64> {
        if !(self.ema_fast > 0.0) || !(self.ema_slow > 0.0) {
            return None;
        }
        let s = (self.ema_fast - self.ema_slow) / self.ema_slow;
        s.is_finite().then_some(s)
    }
}

// =============================================================================
// Actions and votes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Hold,
    Buy,
    Sell,
}

impl ActionType {
    /// Stable priority order; earlier entries win ties.
    pub const ALL: [ActionType; 3] = [ActionType::Hold, ActionType::Buy, ActionType::Sell];

    pub fn index(&self) -> usize {
        match self {
            ActionType::Hold => 0,
            ActionType::Buy => 1,
            ActionType::Sell => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Hold => "hold",
            ActionType::Buy => "buy",
            ActionType::Sell => "sell",
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            ActionType::Hold => None,
            ActionType::Buy => Some(Side::Buy),
            ActionType::Sell => Some(Side::Sell),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells. Adverse price moves have the same sign.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    /// Fraction of capital, 0..=1
    pub size: f64,
    pub confidence: f64,
    pub leverage: f64,
}

impl Action {
    pub fn hold() -> Self {
        Self {
            action_type: ActionType::Hold,
            size: 0.0,
            confidence: 0.0,
            leverage: 1.0,
        }
    }

    /// Unsized action carrying only direction and confidence.
    pub fn pending(action_type: ActionType, confidence: f64) -> Self {
        Self {
            action_type,
            size: 0.0,
            confidence,
            leverage: 1.0,
        }
    }

    pub fn is_tradeable(&self) -> bool {
        self.action_type != ActionType::Hold && self.size > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineVote {
    pub engine_name: String,
    pub action_type: ActionType,
    pub confidence: f64,
}

impl EngineVote {
    pub fn new(engine_name: &str, action_type: ActionType, confidence: f64) -> Self {
        Self {
            engine_name: engine_name.to_string(),
            action_type,
            confidence,
        }
    }
}

// =============================================================================
// Decisions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Approved,
    BlockedByFilter,
    BlockedByConfidence,
    BlockedByCircuitBreaker,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Approved => "approved",
            DecisionStatus::BlockedByFilter => "blocked_by_filter",
            DecisionStatus::BlockedByConfidence => "blocked_by_confidence",
            DecisionStatus::BlockedByCircuitBreaker => "blocked_by_circuit_breaker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub consensus_confidence: f64,
    pub status: DecisionStatus,
    pub reasons: Vec<String>,
    pub votes: Vec<EngineVote>,
}

impl Decision {
    pub fn blocked(status: DecisionStatus, reasons: Vec<String>) -> Self {
        Self {
            action: Action::hold(),
            consensus_confidence: 0.0,
            status,
            reasons,
            votes: Vec::new(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == DecisionStatus::Approved
    }
}

// =============================================================================
// Execution reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Jito,
    Twap,
    None,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Jito => "jito",
            Venue::Twap => "twap",
            Venue::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub filled: bool,
    pub fill_price: f64,
    /// Adverse fraction of the arrival price; negative means price improvement.
    pub realized_slippage: f64,
    pub fees_paid: f64,
    pub latency_ms: f64,
    pub venue: Venue,
    pub side: Option<Side>,
    pub leverage: f64,
    /// Fractions of capital
    pub requested_size: f64,
    pub filled_size: f64,
    pub slices_executed: u32,
    pub slices_aborted: u32,
    pub note: Option<String>,
}

impl ExecutionReport {
    /// Nothing sent to any venue.
    pub fn not_sent(note: &str) -> Self {
        Self {
            filled: false,
            fill_price: 0.0,
            realized_slippage: 0.0,
            fees_paid: 0.0,
            latency_ms: 0.0,
            venue: Venue::None,
            side: None,
            leverage: 1.0,
            requested_size: 0.0,
            filled_size: 0.0,
            slices_executed: 0,
            slices_aborted: 0,
            note: Some(note.to_string()),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.filled && self.filled_size + 1e-12 < self.requested_size
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.requested_size > 0.0 {
            self.filled_size / self.requested_size
        } else {
            0.0
        }
    }
}
