//! Smoke tests: full paper sessions over simulated and replayed markets.

use std::sync::Arc;

use hyperaccum::adapter::replay::{Bar, ReplayConfig, ReplayMarket};
use hyperaccum::adapter::sim::{SimMarketConfig, SimQuoteConfig};
use hyperaccum::adapter::{FixedMargin, SimulatedMarket, SimulatedQuotes};
use hyperaccum::breaker::BreakerState;
use hyperaccum::config::Config;
use hyperaccum::metrics::check_health;
use hyperaccum::sim::PaperSession;

fn quotes() -> Arc<SimulatedQuotes> {
    Arc::new(SimulatedQuotes::new(SimQuoteConfig::default(), 150.0))
}

#[tokio::test]
async fn simulated_session_writes_healthy_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("performance_stats.json");
    let cfg = Config::default();

    let mut session = PaperSession::simulated(&cfg).with_metrics_path(&path);
    let doc = session.run(300).await;

    let on_disk = check_health(&path).unwrap();
    assert_eq!(on_disk.cycle_count, 300);
    assert_eq!(on_disk.total_trades, doc.total_trades);
    assert_eq!(doc.mode, "paper");

    let blocked = doc.blocked.filter + doc.blocked.confidence + doc.blocked.circuit_breaker;
    let approved = (doc.approval_rate * doc.cycle_count as f64).round() as u64;
    assert_eq!(blocked + approved, doc.cycle_count);

    match doc.circuit_breaker_status {
        BreakerState::Tripped => assert!(doc.trip_reason.is_some()),
        BreakerState::Armed => assert!(doc.trip_reason.is_none()),
    }
    assert!(doc.winning_trades <= doc.total_trades);
    assert!(doc.current_capital.is_finite());

    let tracker = session.tracker();
    assert_eq!(tracker.cycles(), doc.cycle_count);
    assert_eq!(tracker.trades(), doc.total_trades);
    assert_eq!(tracker.total_pnl(), doc.total_pnl);
}

#[tokio::test]
async fn flaky_feed_skips_cycles_without_failing() {
    let cfg = Config::default();
    let feed = SimulatedMarket::new(SimMarketConfig {
        failure_rate: 0.5,
        ..Default::default()
    });
    let mut session = PaperSession::new(&cfg, Box::new(feed), quotes(), Arc::new(FixedMargin::refusing()));
    let doc = session.run(200).await;
    assert!(doc.cycle_count > 0);
    assert!(doc.cycle_count < 200);
    assert_eq!(session.core().cycle_count(), doc.cycle_count);
}

#[tokio::test]
async fn replayed_trend_is_traded() {
    // steady uptrend with small oscillation; 0.3% per bar
    let bars: Vec<Bar> = (0..200)
        .map(|i| {
            let c = 100.0 * (1.003f64).powi(i) * (1.0 + 0.0005 * ((i % 3) as f64 - 1.0));
            Bar {
                ts: 1_700_000_000 + i as i64 * 900,
                o: c,
                h: c * 1.0005,
                l: c * 0.9995,
                c,
                v: 20_000.0,
            }
        })
        .collect();
    let cfg = Config::default();
    let feed = ReplayMarket::new(ReplayConfig::default(), bars);
    let mut session = PaperSession::new(&cfg, Box::new(feed), quotes(), Arc::new(FixedMargin::granting(1e6)));

    let doc = session.run(250).await;
    assert_eq!(doc.cycle_count, 200, "replay stops at the last bar");
    assert!(doc.total_trades > 0);
    assert!(session.core().allocation().snapshot().trades > 0);
    assert!(session.core().learning().snapshot().updates > 0);
}
