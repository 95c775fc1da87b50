//! Paper trading over the decision core.
//!
//! Each filled action is held for exactly one cycle and marked at the next
//! snapshot. The realized result is fed back into the allocation engine, the
//! learning engine and the circuit breaker before the next decision is made.

use std::path::PathBuf;
use std::sync::Arc;

use crate::adapter::sim::{SimMarketConfig, SimQuoteConfig};
use crate::adapter::{FixedMargin, MarginAuthority, MarketDataSource, SimulatedMarket, SimulatedQuotes};
use crate::config::Config;
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use crate::metrics::{self, MetricsDocument, PerformanceTracker};
use crate::pipeline::TradingCore;
use crate::types::{Action, Decision, ExecutionReport, MarketState};

#[derive(Debug, Clone)]
struct OpenPosition {
    action: Action,
    report: ExecutionReport,
    entry: MarketState,
    /// Capital the size fraction referred to at entry
    capital: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedTrade {
    pub pnl: f64,
    /// PnL over deployed (unlevered) notional
    pub ret: f64,
    pub tripped_breaker: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub decision: Option<Decision>,
    pub report: Option<ExecutionReport>,
    pub closed: Option<ClosedTrade>,
}

/// Leveraged mark-to-market PnL of a one-cycle hold, net of entry fees.
pub fn position_pnl(report: &ExecutionReport, capital: f64, exit_price: f64) -> f64 {
    let side = match report.side {
        Some(s) if report.filled && report.fill_price > 0.0 => s,
        _ => return 0.0,
    };
    let notional = report.filled_size * capital * report.leverage;
    side.sign() * (exit_price - report.fill_price) / report.fill_price * notional - report.fees_paid
}

pub struct PaperSession {
    core: TradingCore,
    feed: Box<dyn MarketDataSource>,
    quotes: Arc<SimulatedQuotes>,
    tracker: PerformanceTracker,
    open: Option<OpenPosition>,
    metrics_path: Option<PathBuf>,
}

impl PaperSession {
    pub fn new(
        cfg: &Config,
        feed: Box<dyn MarketDataSource>,
        quotes: Arc<SimulatedQuotes>,
        margin: Arc<dyn MarginAuthority>,
    ) -> Self {
        Self {
            core: TradingCore::new(cfg, margin, quotes.clone()),
            feed,
            quotes,
            tracker: PerformanceTracker::new("paper", cfg.breaker.initial_capital),
            open: None,
            metrics_path: None,
        }
    }

    /// Seeded random-walk market, simulated quotes and a generous margin desk.
    pub fn simulated(cfg: &Config) -> Self {
        let market = SimMarketConfig {
            symbol: cfg.symbol.clone(),
            seed: cfg.seed,
            ..Default::default()
        };
        let start = market.start_price;
        let quotes = SimQuoteConfig {
            seed: cfg.seed.wrapping_add(1),
            ..Default::default()
        };
        Self::new(
            cfg,
            Box::new(SimulatedMarket::new(market)),
            Arc::new(SimulatedQuotes::new(quotes, start)),
            Arc::new(FixedMargin::granting(cfg.breaker.initial_capital * 10.0)),
        )
    }

    pub fn with_metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    pub fn core(&self) -> &TradingCore {
        &self.core
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub async fn step(&mut self) -> StepOutcome {
        let market = match self.feed.fetch().await {
            Ok(m) => m,
            Err(err) => {
                logging::log(
                    Level::Warn,
                    Domain::Market,
                    "data_unavailable",
                    obj(&[("msg", v_str("cycle skipped")), ("error", v_str(&format!("{:#}", err)))]),
                );
                return StepOutcome::default();
            }
        };
        self.quotes.set_reference(market.price);

        let closed = self.open.take().map(|pos| self.close(pos, &market));

        let decision = self.core.run_cycle(&market).await;
        self.tracker.record_decision(&decision);

        let mut report = None;
        if decision.is_approved() && decision.action.is_tradeable() {
            let capital = self.core.breaker().capital();
            let r = self.core.execute(&decision.action, &market).await;
            if r.filled {
                self.open = Some(OpenPosition {
                    action: decision.action,
                    report: r.clone(),
                    entry: market.clone(),
                    capital,
                });
            }
            report = Some(r);
        }

        self.persist();
        StepOutcome {
            decision: Some(decision),
            report,
            closed,
        }
    }

    fn close(&mut self, pos: OpenPosition, market: &MarketState) -> ClosedTrade {
        let pnl = position_pnl(&pos.report, pos.capital, market.price);
        let deployed = pos.report.filled_size * pos.capital;
        let ret = if deployed > 0.0 { pnl / deployed } else { 0.0 };

        self.core.record_outcome(ret);
        self.core
            .update_learning(&pos.entry, pos.action.action_type, ret, market);
        let tripped_breaker = self.core.record_pnl(pnl, market.timestamp);
        self.tracker.record_trade(pnl);

        logging::log(
            Level::Info,
            Domain::Exec,
            "position_closed",
            obj(&[
                ("action", v_str(pos.action.action_type.as_str())),
                ("entry", v_num(pos.report.fill_price)),
                ("exit", v_num(market.price)),
                ("pnl", v_num(pnl)),
                ("return", v_num(ret)),
            ]),
        );
        ClosedTrade {
            pnl,
            ret,
            tripped_breaker,
        }
    }

    pub fn document(&self) -> MetricsDocument {
        let breaker = self.core.breaker();
        self.tracker.document(breaker.status(), breaker.state().trip_reason)
    }

    fn persist(&self) {
        let Some(path) = &self.metrics_path else {
            return;
        };
        if let Err(err) = metrics::write_metrics(path, &self.document()) {
            logging::log(
                Level::Warn,
                Domain::System,
                "metrics_write_failed",
                obj(&[("error", v_str(&format!("{:#}", err)))]),
            );
        }
    }

    /// Run `cycles` fetch attempts and return the final metrics document.
    pub async fn run(&mut self, cycles: u64) -> MetricsDocument {
        for _ in 0..cycles {
            self.step().await;
        }
        let doc = self.document();
        logging::log_session_summary(
            doc.cycle_count,
            doc.total_trades,
            doc.win_rate,
            doc.total_pnl,
            doc.return_pct,
            doc.circuit_breaker_status.as_str(),
        );
        self.persist();
        doc
    }
}
