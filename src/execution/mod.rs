//! Execution strategies and the router that picks between them.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{RoutePolicy, RouterConfig};
use crate::logging;
use crate::types::{Action, ExecutionReport, MarketState, Venue};

pub mod bundle;
pub mod twap;

pub use bundle::BundleStrategy;
pub use twap::TwapStrategy;

/// Submit one sized action against a snapshot. `capital` converts the
/// fractional size into notional.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn venue(&self) -> Venue;
    async fn submit(&self, action: &Action, market: &MarketState, capital: f64) -> Result<ExecutionReport>;
}

pub struct ExecutionRouter {
    cfg: RouterConfig,
    /// Sizes above this go to TWAP under the auto policy
    twap_threshold: f64,
    bundle: Arc<dyn ExecutionStrategy>,
    twap: Arc<dyn ExecutionStrategy>,
}

impl ExecutionRouter {
    pub fn new(
        cfg: RouterConfig,
        twap_threshold: f64,
        bundle: Arc<dyn ExecutionStrategy>,
        twap: Arc<dyn ExecutionStrategy>,
    ) -> Self {
        Self {
            cfg,
            twap_threshold,
            bundle,
            twap,
        }
    }

    pub fn policy(&self) -> RoutePolicy {
        self.cfg.policy
    }

    /// Venue for `action` under `policy`; `None` when nothing should be sent.
    pub fn select(&self, policy: RoutePolicy, action: &Action, market: &MarketState) -> Option<Venue> {
        if !action.is_tradeable() {
            return None;
        }
        let venue = match policy {
            RoutePolicy::Bundle => Venue::Jito,
            RoutePolicy::Twap => Venue::Twap,
            RoutePolicy::Auto => {
                if market.mev_risk_score >= self.cfg.auto_bundle_mev_risk {
                    Venue::Jito
                } else if action.size > self.twap_threshold {
                    Venue::Twap
                } else {
                    Venue::Jito
                }
            }
        };
        Some(venue)
    }

    pub async fn execute(&self, action: &Action, market: &MarketState, capital: f64) -> ExecutionReport {
        self.execute_with(self.cfg.policy, action, market, capital).await
    }

    /// Route with a caller-chosen policy. Strategy errors come back as unfilled reports.
    pub async fn execute_with(
        &self,
        policy: RoutePolicy,
        action: &Action,
        market: &MarketState,
        capital: f64,
    ) -> ExecutionReport {
        let report = match self.select(policy, action, market) {
            None => ExecutionReport::not_sent("nothing to execute"),
            Some(venue) => {
                let strategy = match venue {
                    Venue::Twap => &self.twap,
                    _ => &self.bundle,
                };
                match strategy.submit(action, market, capital).await {
                    Ok(report) => report,
                    Err(err) => {
                        let mut r = ExecutionReport::not_sent(&format!("{} submit failed: {:#}", venue.as_str(), err));
                        r.venue = strategy.venue();
                        r.side = action.action_type.side();
                        r.leverage = action.leverage;
                        r.requested_size = action.size;
                        r
                    }
                }
            }
        };
        logging::log_execution(&report);
        report
    }
}
