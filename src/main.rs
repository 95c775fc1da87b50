use anyhow::Result;
use serde_json::json;

use hyperaccum::config::Config;
use hyperaccum::logging::{self, obj, v_str, Domain, Level};
use hyperaccum::sim::PaperSession;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load()?;
    let cycles: u64 = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CYCLES").ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);

    logging::log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("symbol", v_str(&cfg.symbol)),
            ("mode", v_str("paper")),
            ("cycles", json!(cycles)),
            ("seed", json!(cfg.seed)),
            ("route", json!(cfg.router.policy)),
            ("metrics_path", v_str(&cfg.metrics_path)),
        ]),
    );

    let mut session = PaperSession::simulated(&cfg).with_metrics_path(&cfg.metrics_path);
    let doc = session.run(cycles).await;

    eprintln!(
        "cycles={} trades={} win_rate={:.1}% pnl={:.4} return={:.2}% capital={:.4} breaker={}",
        doc.cycle_count,
        doc.total_trades,
        doc.win_rate,
        doc.total_pnl,
        doc.return_pct,
        doc.current_capital,
        doc.circuit_breaker_status.as_str(),
    );
    logging::flush();
    Ok(())
}
