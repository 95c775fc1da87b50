//! Property-based tests for time-sliced execution.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use proptest::prelude::*;

use hyperaccum::adapter::{Quote, QuoteSource};
use hyperaccum::config::TwapConfig;
use hyperaccum::execution::{ExecutionStrategy, TwapStrategy};
use hyperaccum::types::{Action, ActionType, MarketState, Side};

/// Serves quotes in order; `None` entries and an empty script are errors.
struct Script {
    quotes: Mutex<VecDeque<Option<Quote>>>,
    calls: AtomicU32,
}

impl Script {
    fn new(quotes: Vec<Option<Quote>>) -> Self {
        Self {
            quotes: Mutex::new(quotes.into()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl QuoteSource for Script {
    async fn quote(&self, _notional: f64, _side: Side) -> Result<Quote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.quotes.lock().unwrap().pop_front() {
            Some(Some(q)) => Ok(q),
            Some(None) => Err(anyhow!("venue timeout")),
            None => Err(anyhow!("no more quotes")),
        }
    }
}

fn quote_strategy() -> impl Strategy<Value = Option<Quote>> {
    prop_oneof![
        1 => Just(None),
        6 => (-0.02f64..0.02, 0.0f64..0.015, 1.0f64..500.0).prop_map(|(offset, expected, latency)| {
            Some(Quote {
                price: 100.0 * (1.0 + offset),
                expected_slippage: expected,
                latency_ms: latency,
            })
        }),
    ]
}

proptest! {
    #[test]
    fn twap_never_overfills_or_resumes_after_stop(
        script in prop::collection::vec(quote_strategy(), 0..12),
        size in 0.001f64..0.35,
        sell in any::<bool>(),
        capital in 10.0f64..100_000.0,
    ) {
        let source = Arc::new(Script::new(script.clone()));
        let twap = TwapStrategy::new(TwapConfig::default(), source.clone());
        let n = twap.slice_count(size);
        let action = Action {
            action_type: if sell { ActionType::Sell } else { ActionType::Buy },
            size,
            confidence: 0.9,
            leverage: 1.0,
        };
        let market = MarketState::quiet("SOL/USD", 100.0);

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let r = rt.block_on(twap.submit(&action, &market, capital)).unwrap();

        prop_assert!(r.filled_size <= r.requested_size + 1e-12, "{} > {}", r.filled_size, r.requested_size);
        prop_assert_eq!(r.slices_executed + r.slices_aborted, n);
        prop_assert_eq!(r.filled, r.slices_executed > 0);

        // one quote per executed slice, plus the one that stopped slicing
        let calls = source.calls.load(Ordering::SeqCst);
        let stopped = u32::from(r.slices_aborted > 0);
        prop_assert_eq!(calls, r.slices_executed + stopped);

        // slices only execute on a leading run of good quotes
        let usable = script.iter().take_while(|q| q.is_some()).count() as u32;
        prop_assert!(r.slices_executed <= usable);

        if r.slices_aborted > 0 {
            prop_assert!(r.note.is_some());
            if r.filled {
                prop_assert!(r.is_partial());
            }
        }
    }
}
