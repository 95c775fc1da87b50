use std::sync::Arc;

use anyhow::{bail, Result};

use hyperaccum::adapter::replay::{load_bars, ReplayConfig, ReplayMarket};
use hyperaccum::adapter::sim::SimQuoteConfig;
use hyperaccum::adapter::{FixedMargin, SimulatedQuotes};
use hyperaccum::config::Config;
use hyperaccum::logging;
use hyperaccum::sim::PaperSession;

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "data.csv".to_string());
    let cfg = Config::load()?;

    let (bars, bad_rows) = load_bars(&path)?;
    if bad_rows > 0 {
        eprintln!("skipped {} bad rows in {}", bad_rows, path);
    }
    if bars.is_empty() {
        bail!("no rows parsed from {}", path);
    }
    let first_close = bars[0].c;
    let n = bars.len() as u64;

    let feed = ReplayMarket::new(
        ReplayConfig {
            symbol: cfg.symbol.clone(),
            ..Default::default()
        },
        bars,
    );
    let quotes = Arc::new(SimulatedQuotes::new(
        SimQuoteConfig {
            seed: cfg.seed,
            ..Default::default()
        },
        first_close,
    ));
    let margin = Arc::new(FixedMargin::granting(cfg.breaker.initial_capital * 10.0));

    let mut session = PaperSession::new(&cfg, Box::new(feed), quotes, margin);
    if let Ok(out) = std::env::var("BACKTEST_METRICS") {
        session = session.with_metrics_path(out);
    }
    let doc = session.run(n).await;

    println!("{}", serde_json::to_string_pretty(&doc)?);
    logging::flush();
    Ok(())
}
