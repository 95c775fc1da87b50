//! End-to-end scenarios through `TradingCore`.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};

use hyperaccum::adapter::sim::SimQuoteConfig;
use hyperaccum::adapter::{FixedMargin, SimulatedQuotes};
use hyperaccum::config::{Config, RoutePolicy};
use hyperaccum::consensus::ScoringEngine;
use hyperaccum::types::{ActionType, DecisionStatus, EngineVote, MarketState, Venue};
use hyperaccum::TradingCore;

struct Fixed {
    name: &'static str,
    action: ActionType,
    confidence: f64,
}

impl ScoringEngine for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    fn score(&self, _: &MarketState) -> Result<EngineVote> {
        Ok(EngineVote::new(self.name, self.action, self.confidence))
    }
}

fn make_core(cfg: &Config) -> TradingCore {
    TradingCore::new(
        cfg,
        Arc::new(FixedMargin::granting(1e9)),
        Arc::new(SimulatedQuotes::new(SimQuoteConfig::default(), 150.0)),
    )
}

/// Core whose only voters are two fixed BUY engines.
fn make_buy_core(cfg: &Config) -> TradingCore {
    let mut core = make_core(cfg);
    assert!(core.unregister_engine("allocation"));
    assert!(core.unregister_engine("learning"));
    core.register_engine(Arc::new(Fixed { name: "fast", action: ActionType::Buy, confidence: 0.9 }));
    core.register_engine(Arc::new(Fixed { name: "slow", action: ActionType::Buy, confidence: 0.6 }));
    core
}

#[tokio::test]
async fn high_mev_blocks_before_scoring() {
    let mut core = make_buy_core(&Config::default());
    let mut m = MarketState::quiet("SOL/USD", 150.0);
    m.mev_risk_score = 0.9;

    let d = core.run_cycle(&m).await;
    assert_eq!(d.status, DecisionStatus::BlockedByFilter);
    assert!(d.reasons.iter().any(|r| r.contains("MEV")));
    assert!(d.votes.is_empty());
    assert!(!d.action.is_tradeable());

    let report = core.execute(&d.action, &m).await;
    assert!(!report.filled);
    assert_eq!(report.venue, Venue::None);
}

#[tokio::test]
async fn unanimous_buy_gives_full_consensus() {
    let mut core = make_buy_core(&Config::default());
    let m = MarketState::quiet("SOL/USD", 150.0);

    let d = core.run_cycle(&m).await;
    assert_eq!(d.status, DecisionStatus::Approved);
    assert_eq!(d.consensus_confidence, 1.0);
    assert_eq!(d.action.action_type, ActionType::Buy);
    assert_eq!(d.votes.len(), 2);
    // cold-start allocation; consensus 1.0 levers up to the cap
    assert_eq!(d.action.size, 0.01);
    assert_eq!(d.action.leverage, 5.0);

    let report = core.execute_with(RoutePolicy::Twap, &d.action, &m).await;
    assert!(report.filled);
    assert_eq!(report.venue, Venue::Twap);
    assert!(report.filled_size <= d.action.size);
}

#[tokio::test]
async fn fifth_consecutive_loss_trips_breaker() {
    let mut core = make_buy_core(&Config::default());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    for i in 0..4 {
        assert!(!core.record_pnl(-0.2, t0 + Duration::minutes(i)));
    }
    assert_eq!(core.breaker().state().consecutive_loss_count, 4);

    let m = MarketState::quiet("SOL/USD", 150.0);
    assert_eq!(core.run_cycle(&m).await.status, DecisionStatus::Approved);

    assert!(core.record_pnl(-0.2, t0 + Duration::minutes(5)));
    let d = core.run_cycle(&m).await;
    assert_eq!(d.status, DecisionStatus::BlockedByCircuitBreaker);
    assert!(d.reasons[0].contains("consecutive_losses"));
}

#[tokio::test]
async fn tripped_breaker_holds_for_a_thousand_cycles() {
    let mut core = make_buy_core(&Config::default());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    core.record_pnl(10.0, t0);
    core.record_pnl(-40.0, t0 + Duration::days(1));
    assert!(!core.breaker().allow());
    let peak = core.breaker().state().peak_capital;

    let m = MarketState::quiet("SOL/USD", 150.0);
    for i in 0..1000 {
        let d = core.run_cycle(&m).await;
        assert_eq!(d.status, DecisionStatus::BlockedByCircuitBreaker);
        core.record_pnl(25.0, t0 + Duration::minutes(i));
        assert_eq!(core.breaker().state().peak_capital, peak);
    }
    assert_eq!(core.cycle_count(), 1000);
}

#[tokio::test]
async fn low_confidence_split_is_blocked() {
    let mut cfg = Config::default();
    cfg.consensus.parallel_scoring = false;
    let mut core = make_core(&cfg);
    assert!(core.unregister_engine("allocation"));
    assert!(core.unregister_engine("learning"));
    core.register_engine(Arc::new(Fixed { name: "bull", action: ActionType::Buy, confidence: 0.7 }));
    core.register_engine(Arc::new(Fixed { name: "bear", action: ActionType::Sell, confidence: 0.5 }));

    let d = core.run_cycle(&MarketState::quiet("SOL/USD", 150.0)).await;
    assert_eq!(d.status, DecisionStatus::BlockedByConfidence);
    assert!(d.consensus_confidence < 0.75);
    assert_eq!(d.action.size, 0.0);
}

#[tokio::test]
async fn refused_margin_trades_unlevered() {
    let cfg = Config::default();
    let mut core = TradingCore::new(
        &cfg,
        Arc::new(FixedMargin::refusing()),
        Arc::new(SimulatedQuotes::new(SimQuoteConfig::default(), 150.0)),
    );
    assert!(core.unregister_engine("learning"));
    core.register_engine(Arc::new(Fixed { name: "extra", action: ActionType::Buy, confidence: 0.95 }));
    let mut m = MarketState::quiet("SOL/USD", 150.0);
    m.ema_fast = 151.5;
    m.ema_slow = 150.0;

    let d = core.run_cycle(&m).await;
    assert_eq!(d.status, DecisionStatus::Approved);
    assert_eq!(d.action.leverage, 1.0);
    assert!(d.action.size > 0.0);
}
