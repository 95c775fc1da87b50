//! Property-based tests for sizing bounds and admission reason counts.

use std::sync::Arc;

use proptest::prelude::*;

use hyperaccum::adapter::FixedMargin;
use hyperaccum::allocation::AllocationEngine;
use hyperaccum::config::{AllocationConfig, GateConfig, SizerConfig};
use hyperaccum::gate::AdmissionFilter;
use hyperaccum::sizing::{bounded_size, target_leverage, RiskSizer};
use hyperaccum::types::{Action, ActionType, Decision, DecisionStatus, MarketState, Regime};

fn approved(action_type: ActionType, consensus: f64) -> Decision {
    Decision {
        action: Action::pending(action_type, consensus),
        consensus_confidence: consensus,
        status: DecisionStatus::Approved,
        reasons: vec![],
        votes: vec![],
    }
}

fn market(volatility: f64, liquidity: f64, regime: Regime) -> MarketState {
    let mut m = MarketState::quiet("SOL/USD", 150.0);
    m.volatility = volatility;
    m.liquidity_score = liquidity;
    m.regime = regime;
    m
}

fn regime_strategy() -> impl Strategy<Value = Regime> {
    prop::sample::select(Regime::ALL.to_vec())
}

proptest! {
    #[test]
    fn sizer_output_always_bounded(
        outcomes in prop::collection::vec(-0.2f64..0.2, 0..40),
        consensus in 0.0f64..=1.0,
        volatility in 0.0f64..0.5,
        liquidity in 0.0f64..=1.0,
        capital in 1.0f64..100_000.0,
        regime in regime_strategy(),
        grant in any::<bool>(),
        buy in any::<bool>(),
    ) {
        let cfg = SizerConfig::default();
        let engine = AllocationEngine::new(AllocationConfig::default());
        for r in &outcomes {
            engine.record_outcome(*r);
        }
        let margin = if grant { FixedMargin::granting(f64::MAX) } else { FixedMargin::refusing() };
        let sizer = RiskSizer::new(cfg.clone(), Arc::new(engine), Arc::new(margin));
        let side = if buy { ActionType::Buy } else { ActionType::Sell };

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let d = rt.block_on(sizer.size(approved(side, consensus), &market(volatility, liquidity, regime), capital));

        prop_assert!(d.action.size >= 0.0 && d.action.size <= cfg.max_position_pct, "size {}", d.action.size);
        prop_assert!(d.action.leverage >= 1.0 && d.action.leverage <= cfg.max_leverage, "lev {}", d.action.leverage);
        if !grant {
            prop_assert_eq!(d.action.leverage, 1.0);
        }
    }

    #[test]
    fn pure_sizing_functions_bounded(
        allocation in -1.0f64..2.0,
        consensus in -0.5f64..1.5,
        volatility in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), 0.0f64..1.0],
    ) {
        let cfg = SizerConfig::default();
        let size = bounded_size(allocation, volatility, &cfg);
        prop_assert!((0.0..=cfg.max_position_pct).contains(&size));
        let lev = target_leverage(consensus, volatility, &cfg);
        prop_assert!((1.0..=cfg.max_leverage).contains(&lev));
    }

    #[test]
    fn filter_reports_every_violation(
        mev_bad in any::<bool>(),
        latency_bad in any::<bool>(),
        volume_bad in any::<bool>(),
        spread_bad in any::<bool>(),
        ema_bad in any::<bool>(),
    ) {
        let filter = AdmissionFilter::new(GateConfig::default());
        let mut m = MarketState::quiet("SOL/USD", 100.0);
        let mut expected = 0;
        if mev_bad { m.mev_risk_score = 0.95; expected += 1; }
        if latency_bad { m.latency_ms = 1500.0; expected += 1; }
        if volume_bad { m.volume_24h = 5.0; expected += 1; }
        // widened symmetrically so the quote stays consistent
        if spread_bad { m.bid = 96.0; m.ask = 104.0; expected += 1; }
        if ema_bad { m.ema_fast = 80.0; expected += 1; }

        let v = filter.evaluate(&m);
        prop_assert_eq!(v.reasons.len(), expected, "{:?}", v.reasons);
        prop_assert_eq!(v.allowed, expected == 0);
        prop_assert!(v.risk_score >= 0.0 && v.risk_score <= 1.0);
    }
}
