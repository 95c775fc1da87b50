//! One decision core per process.
//!
//! `TradingCore` owns every stateful component and runs them in order:
//! breaker gate, admission, consensus, sizing. Execution and the feedback
//! calls (`record_outcome`, `update_learning`, `record_pnl`) are separate so
//! the driver decides when an outcome is known.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::adapter::{MarginAuthority, MarketDataSource, QuoteSource};
use crate::allocation::AllocationEngine;
use crate::breaker::CircuitBreaker;
use crate::config::{Config, RoutePolicy};
use crate::consensus::{ConsensusAggregator, ScoringEngine};
use crate::execution::{BundleStrategy, ExecutionRouter, TwapStrategy};
use crate::gate::AdmissionFilter;
use crate::learning::LearningEngine;
use crate::logging::{self, obj, v_str, Domain, Level, ProfileScope};
use crate::sizing::RiskSizer;
use crate::types::{Action, ActionType, Decision, DecisionStatus, ExecutionReport, MarketState};

pub struct TradingCore {
    allocation: Arc<AllocationEngine>,
    learning: Arc<LearningEngine>,
    aggregator: ConsensusAggregator,
    sizer: RiskSizer,
    breaker: CircuitBreaker,
    router: ExecutionRouter,
    cycles: u64,
}

impl TradingCore {
    pub fn new(cfg: &Config, margin: Arc<dyn MarginAuthority>, quotes: Arc<dyn QuoteSource>) -> Self {
        let allocation = Arc::new(AllocationEngine::new(cfg.allocation.clone()));
        let learning = Arc::new(LearningEngine::new(cfg.learning.clone()));

        let mut aggregator = ConsensusAggregator::new(
            cfg.consensus.clone(),
            AdmissionFilter::new(cfg.gate.clone()),
        );
        aggregator.register(allocation.clone());
        aggregator.register(learning.clone());

        let router = ExecutionRouter::new(
            cfg.router.clone(),
            cfg.twap.max_slice_pct,
            Arc::new(BundleStrategy::new(cfg.bundle.clone())),
            Arc::new(TwapStrategy::new(cfg.twap.clone(), quotes)),
        );

        Self {
            sizer: RiskSizer::new(cfg.sizer.clone(), allocation.clone(), margin),
            breaker: CircuitBreaker::new(cfg.breaker.clone()),
            allocation,
            learning,
            aggregator,
            router,
            cycles: 0,
        }
    }

    pub fn register_engine(&mut self, engine: Arc<dyn ScoringEngine>) {
        self.aggregator.register(engine);
    }

    pub fn unregister_engine(&mut self, name: &str) -> bool {
        self.aggregator.unregister(name).is_some()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.aggregator.engine_names()
    }

    pub fn allocation(&self) -> &AllocationEngine {
        &self.allocation
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Operator re-arm of a tripped breaker.
    pub fn reset_breaker(&mut self) {
        self.breaker.reset();
        logging::log(
            Level::Warn,
            Domain::Breaker,
            "reset",
            obj(&[("msg", v_str("circuit breaker re-armed by operator"))]),
        );
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycles
    }

    /// Breaker gate, admission, consensus and sizing for one snapshot.
    pub async fn run_cycle(&mut self, market: &MarketState) -> Decision {
        let _p = ProfileScope::with_context("run_cycle", &[("symbol", v_str(&market.symbol))]);
        self.cycles += 1;

        let decision = if !self.breaker.allow() {
            let reason = self
                .breaker
                .state()
                .trip_reason
                .map(|r| r.as_str())
                .unwrap_or("unknown");
            Decision::blocked(
                DecisionStatus::BlockedByCircuitBreaker,
                vec![format!("circuit breaker tripped: {}", reason)],
            )
        } else {
            let decision = self.aggregator.decide(market).await;
            self.sizer.size(decision, market, self.breaker.capital()).await
        };

        logging::log_decision(self.cycles, &decision);
        logging::log_audit(self.cycles, &decision);
        decision
    }

    /// Fetch then decide. A failed fetch skips the cycle.
    pub async fn poll_cycle(&mut self, source: &dyn MarketDataSource) -> Option<(MarketState, Decision)> {
        match source.fetch().await {
            Ok(market) => {
                let decision = self.run_cycle(&market).await;
                Some((market, decision))
            }
            Err(err) => {
                logging::log(
                    Level::Warn,
                    Domain::Market,
                    "data_unavailable",
                    obj(&[("msg", v_str("cycle skipped")), ("error", v_str(&format!("{:#}", err)))]),
                );
                None
            }
        }
    }

    pub async fn execute(&self, action: &Action, market: &MarketState) -> ExecutionReport {
        self.execute_with(self.router.policy(), action, market).await
    }

    /// Route under an explicit policy. Nothing is sent while the breaker is tripped.
    pub async fn execute_with(&self, policy: RoutePolicy, action: &Action, market: &MarketState) -> ExecutionReport {
        if !self.breaker.allow() {
            return ExecutionReport::not_sent("circuit breaker tripped");
        }
        self.router
            .execute_with(policy, action, market, self.breaker.capital())
            .await
    }

    /// Realized return of a closed trade (PnL over deployed notional).
    pub fn record_outcome(&self, ret: f64) {
        self.allocation.record_outcome(ret);
    }

    pub fn update_learning(&self, prev: &MarketState, action: ActionType, reward: f64, next: &MarketState) {
        let s = self.learning.state_key(prev);
        let s_next = self.learning.state_key(next);
        self.learning.update(s, action, reward, s_next);
    }

    /// Realized PnL in quote currency. Returns true if this trips the breaker.
    pub fn record_pnl(&mut self, pnl: f64, at: DateTime<Utc>) -> bool {
        self.breaker.record_pnl(pnl, at)
    }
}
