//! Capabilities the decision core consumes.
//!
//! Each trait is one narrow collaborator. Anything that blocks (RPC, HTTP,
//! disk) lives behind these; timeouts are the implementor's business.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{MarketState, Side};

pub mod replay;
pub mod sim;

pub use replay::ReplayMarket;
pub use sim::{FixedMargin, SimulatedMarket, SimulatedQuotes};

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Latest snapshot. An error means data is temporarily unavailable.
    async fn fetch(&self) -> Result<MarketState>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    /// Fraction of the reference price the quote expects to lose to impact.
    pub expected_slippage: f64,
    pub latency_ms: f64,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// `notional` is in quote currency.
    async fn quote(&self, notional: f64, side: Side) -> Result<Quote>;
}

#[async_trait]
pub trait MarginAuthority: Send + Sync {
    /// Ask for `amount` of borrowed notional. `Ok(false)` is a refusal.
    async fn request_leverage(&self, amount: f64) -> Result<bool>;
}
