//! Time-sliced execution.
//!
//! The order is cut into equal slices. Each slice asks the quote source for a
//! fresh price; once a slice is refused every remaining slice is dropped and
//! whatever already executed is reported as a partial fill.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::ExecutionStrategy;
use crate::adapter::QuoteSource;
use crate::config::TwapConfig;
use crate::types::{Action, ExecutionReport, MarketState, Venue};

pub struct TwapStrategy {
    cfg: TwapConfig,
    quotes: Arc<dyn QuoteSource>,
}

/// Why slicing stopped early.
#[derive(Debug, Clone, PartialEq)]
enum Stop {
    QuoteUnavailable(String),
    ExpectedSlippage(f64),
    CumulativeSlippage(f64),
}

impl Stop {
    fn describe(&self) -> String {
        match self {
            Stop::QuoteUnavailable(err) => format!("quote unavailable: {}", err),
            Stop::ExpectedSlippage(s) => format!("quoted slippage {:.5} over cap", s),
            Stop::CumulativeSlippage(s) => format!("cumulative slippage {:.5} over cap", s),
        }
    }
}

impl TwapStrategy {
    pub fn new(cfg: TwapConfig, quotes: Arc<dyn QuoteSource>) -> Self {
        Self { cfg, quotes }
    }

    /// Fixed count when configured, otherwise ceil(size / max_slice_pct); within [1, max_slices].
    pub fn slice_count(&self, size: f64) -> u32 {
        let max = self.cfg.max_slices.max(1);
        let n = if self.cfg.slices > 0 {
            self.cfg.slices
        } else if self.cfg.max_slice_pct > 0.0 {
            (size / self.cfg.max_slice_pct).ceil().min(max as f64) as u32
        } else {
            1
        };
        n.clamp(1, max)
    }
}

#[async_trait]
impl ExecutionStrategy for TwapStrategy {
    fn venue(&self) -> Venue {
        Venue::Twap
    }

    async fn submit(&self, action: &Action, market: &MarketState, capital: f64) -> Result<ExecutionReport> {
        let side = match action.action_type.side() {
            Some(side) if action.size > 0.0 => side,
            _ => return Ok(ExecutionReport::not_sent("nothing to execute")),
        };
        let arrival = market.price;
        if !(arrival > 0.0) || !arrival.is_finite() {
            bail!("no usable arrival price for {}", market.symbol);
        }

        let n = self.slice_count(action.size);
        let slice_size = action.size / n as f64;
        let slice_notional = slice_size * capital.max(0.0) * action.leverage;
        let cap = self.cfg.slippage_cap_pct;

        let mut executed: u32 = 0;
        let mut weighted_slippage = 0.0;
        let mut weighted_price = 0.0;
        let mut traded_notional = 0.0;
        let mut max_latency: f64 = 0.0;
        let mut stop: Option<Stop> = None;

        for i in 0..n {
            if i > 0 && self.cfg.slice_interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.slice_interval_ms)).await;
            }
            let quote = match self.quotes.quote(slice_notional, side).await {
                Ok(q) => q,
                Err(err) => {
                    stop = Some(Stop::QuoteUnavailable(format!("{:#}", err)));
                    break;
                }
            };
            max_latency = max_latency.max(quote.latency_ms);

            if !(quote.expected_slippage <= cap) {
                stop = Some(Stop::ExpectedSlippage(quote.expected_slippage));
                break;
            }
            let slip = side.sign() * (quote.price - arrival) / arrival;
            let filled_before = slice_size * executed as f64;
            let prospective = (weighted_slippage + slip * slice_size) / (filled_before + slice_size);
            if !(prospective <= cap) {
                stop = Some(Stop::CumulativeSlippage(prospective));
                break;
            }

            executed += 1;
            weighted_slippage += slip * slice_size;
            weighted_price += quote.price * slice_size;
            traded_notional += slice_notional;
        }

        let aborted = n - executed;
        let filled_size = (slice_size * executed as f64).min(action.size);
        let filled = executed > 0;

        let note = match (&stop, filled) {
            (None, _) => None,
            (Some(s), true) => Some(format!(
                "partial: {}/{} slices executed, {}",
                executed,
                n,
                s.describe()
            )),
            (Some(s), false) => Some(format!("no slices executed, {}", s.describe())),
        };

        Ok(ExecutionReport {
            filled,
            fill_price: if filled { weighted_price / filled_size } else { 0.0 },
            realized_slippage: if filled { weighted_slippage / filled_size } else { 0.0 },
            fees_paid: self.cfg.fee_pct * traded_notional,
            latency_ms: max_latency,
            venue: Venue::Twap,
            side: Some(side),
            leverage: action.leverage,
            requested_size: action.size,
            filled_size,
            slices_executed: executed,
            slices_aborted: aborted,
            note,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Quote;
    use crate::types::{ActionType, Side};
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Replays a fixed list of quotes, erroring once exhausted.
    struct Scripted {
        quotes: Mutex<Vec<Result<Quote, String>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut quotes: Vec<Result<Quote, String>>) -> Self {
            quotes.reverse();
            Self {
                quotes: Mutex::new(quotes),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl QuoteSource for Scripted {
        async fn quote(&self, _notional: f64, _side: Side) -> Result<Quote> {
            *self.calls.lock().unwrap() += 1;
            match self.quotes.lock().unwrap().pop() {
                Some(Ok(q)) => Ok(q),
                Some(Err(e)) => Err(anyhow!(e)),
                None => Err(anyhow!("script exhausted")),
            }
        }
    }

    fn q(price: f64, expected: f64) -> Result<Quote, String> {
        Ok(Quote {
            price,
            expected_slippage: expected,
            latency_ms: price / 10.0,
        })
    }

    fn buy(size: f64) -> Action {
        Action {
            action_type: ActionType::Buy,
            size,
            confidence: 0.9,
            leverage: 1.0,
        }
    }

    fn make_twap(quotes: Arc<Scripted>) -> TwapStrategy {
        TwapStrategy::new(TwapConfig::default(), quotes)
    }

    #[test]
    fn test_slice_count() {
        let t = make_twap(Arc::new(Scripted::new(vec![])));
        assert_eq!(t.slice_count(0.2), 4);
        assert_eq!(t.slice_count(0.01), 1);
        assert_eq!(t.slice_count(5.0), 20);
        let fixed = TwapStrategy::new(
            TwapConfig {
                slices: 7,
                ..Default::default()
            },
            Arc::new(Scripted::new(vec![])),
        );
        assert_eq!(fixed.slice_count(0.2), 7);
    }

    #[tokio::test]
    async fn test_full_execution_aggregates() {
        let src = Arc::new(Scripted::new(vec![
            q(100.1, 0.001),
            q(100.2, 0.001),
            q(100.3, 0.001),
            q(100.4, 0.001),
        ]));
        let t = make_twap(src.clone());
        let m = MarketState::quiet("SOL/USD", 100.0);
        let r = t.submit(&buy(0.2), &m, 1000.0).await.unwrap();
        assert!(r.filled);
        assert!(!r.is_partial());
        assert_eq!(r.slices_executed, 4);
        assert_eq!(r.slices_aborted, 0);
        assert!((r.fill_price - 100.25).abs() < 1e-9);
        assert!((r.realized_slippage - 0.0025).abs() < 1e-9);
        assert!((r.fees_paid - 0.0005 * 200.0).abs() < 1e-9);
        assert!((r.latency_ms - 10.04).abs() < 1e-9);
        assert!(r.note.is_none());
    }

    #[tokio::test]
    async fn test_abort_stops_all_later_slices() {
        // third slice would push cumulative slippage over 1%
        let src = Arc::new(Scripted::new(vec![
            q(100.2, 0.001),
            q(100.4, 0.001),
            q(103.0, 0.001),
            q(100.1, 0.001),
        ]));
        let t = make_twap(src.clone());
        let m = MarketState::quiet("SOL/USD", 100.0);
        let r = t.submit(&buy(0.2), &m, 1000.0).await.unwrap();
        assert!(r.filled);
        assert!(r.is_partial());
        assert_eq!(r.slices_executed, 2);
        assert_eq!(r.slices_aborted, 2);
        assert!((r.filled_size - 0.1).abs() < 1e-12);
        assert!(r.filled_size <= r.requested_size);
        assert_eq!(src.calls(), 3, "no quote requested after the stop");
        assert!(r.note.unwrap().starts_with("partial: 2/4"));
    }

    #[tokio::test]
    async fn test_quote_failure_mid_run() {
        let src = Arc::new(Scripted::new(vec![q(100.1, 0.001), Err("rpc timeout".into())]));
        let t = make_twap(src.clone());
        let m = MarketState::quiet("SOL/USD", 100.0);
        let r = t.submit(&buy(0.2), &m, 1000.0).await.unwrap();
        assert_eq!(r.slices_executed, 1);
        assert_eq!(r.slices_aborted, 3);
        assert!(r.note.unwrap().contains("rpc timeout"));
    }

    #[tokio::test]
    async fn test_expected_slippage_over_cap_fills_nothing() {
        let src = Arc::new(Scripted::new(vec![q(100.1, 0.02)]));
        let t = make_twap(src);
        let m = MarketState::quiet("SOL/USD", 100.0);
        let r = t.submit(&buy(0.2), &m, 1000.0).await.unwrap();
        assert!(!r.filled);
        assert_eq!(r.fees_paid, 0.0);
        assert_eq!(r.filled_size, 0.0);
        assert_eq!(r.slices_aborted, 4);
    }

    #[tokio::test]
    async fn test_sell_price_improvement_counts_negative() {
        let src = Arc::new(Scripted::new(vec![q(100.5, 0.001)]));
        let t = make_twap(src);
        let m = MarketState::quiet("SOL/USD", 100.0);
        let sell = Action {
            action_type: ActionType::Sell,
            ..buy(0.05)
        };
        let r = t.submit(&sell, &m, 1000.0).await.unwrap();
        assert!(r.filled);
        assert!(r.realized_slippage < 0.0);
    }
}
