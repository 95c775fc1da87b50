//! Scoring-engine capability and confidence-weighted consensus.

use anyhow::Result;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ConsensusConfig;
use crate::gate::AdmissionFilter;
use crate::logging::{self, obj, v_str, Domain, Level, ProfileScope};
use crate::types::{Action, ActionType, Decision, DecisionStatus, EngineVote, MarketState};

/// Anything that turns a market snapshot into one vote.
///
/// `score` may touch engine-private state behind interior locks but must not
/// reach any shared state; engines run concurrently within a cycle.
pub trait ScoringEngine: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, market: &MarketState) -> Result<EngineVote>;
}

pub struct ConsensusAggregator {
    cfg: ConsensusConfig,
    filter: AdmissionFilter,
    engines: BTreeMap<String, Arc<dyn ScoringEngine>>,
}

impl ConsensusAggregator {
    pub fn new(cfg: ConsensusConfig, filter: AdmissionFilter) -> Self {
        Self {
            cfg,
            filter,
            engines: BTreeMap::new(),
        }
    }

    /// Adds or replaces the engine registered under its name.
    pub fn register(&mut self, engine: Arc<dyn ScoringEngine>) -> Option<Arc<dyn ScoringEngine>> {
        self.engines.insert(engine.name().to_string(), engine)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn ScoringEngine>> {
        self.engines.remove(name)
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.keys().map(|k| k.as_str()).collect()
    }

    pub fn filter(&self) -> &AdmissionFilter {
        &self.filter
    }

    pub fn min_confidence(&self) -> f64 {
        self.cfg.min_confidence
    }

    /// Admission, then scoring, then voting. Engines are skipped entirely on a filter block.
    pub async fn decide(&self, market: &MarketState) -> Decision {
        let verdict = self.filter.evaluate(market);
        if verdict.is_blocked() {
            logging::log_gate_block(&market.symbol, &verdict.reasons, verdict.risk_score);
            return Decision::blocked(DecisionStatus::BlockedByFilter, verdict.reasons);
        }

        let _p = ProfileScope::new("score_engines");
        let votes = if self.cfg.parallel_scoring {
            self.score_parallel(market).await
        } else {
            self.score_sequential(market)
        };
        for v in &votes {
            logging::log_vote(&v.engine_name, v.action_type.as_str(), v.confidence);
        }
        aggregate(votes, self.cfg.min_confidence)
    }

    fn score_sequential(&self, market: &MarketState) -> Vec<EngineVote> {
        self.engines
            .iter()
            .filter_map(|(name, engine)| keep_vote(name, engine.score(market)))
            .collect()
    }

    async fn score_parallel(&self, market: &MarketState) -> Vec<EngineVote> {
        let tasks = self.engines.iter().map(|(name, engine)| {
            let engine = Arc::clone(engine);
            let snapshot = market.clone();
            let name = name.clone();
            async move {
                let joined = tokio::task::spawn_blocking(move || engine.score(&snapshot)).await;
                match joined {
                    Ok(result) => keep_vote(&name, result),
                    Err(err) => {
                        log_engine_failure(&name, &err.to_string());
                        None
                    }
                }
            }
        });
        join_all(tasks).await.into_iter().flatten().collect()
    }
}

fn keep_vote(name: &str, result: Result<EngineVote>) -> Option<EngineVote> {
    match result {
        Ok(vote) => Some(vote),
        Err(err) => {
            log_engine_failure(name, &format!("{:#}", err));
            None
        }
    }
}

fn log_engine_failure(name: &str, err: &str) {
    logging::log(
        Level::Warn,
        Domain::Engine,
        "score_failed",
        obj(&[("engine", v_str(name)), ("error", v_str(err))]),
    );
}

/// Confidence-weighted vote.
///
/// Votes are grouped by action; the heaviest group wins (earlier action in
/// `ActionType::ALL` on ties) and consensus is its share of the total weight.
/// Arrival order never matters: votes are sorted by engine name first.
pub fn aggregate(mut votes: Vec<EngineVote>, min_confidence: f64) -> Decision {
    votes.sort_by(|a, b| a.engine_name.cmp(&b.engine_name));

    let mut sums = [0.0f64; 3];
    for v in &votes {
        if v.confidence.is_finite() {
            sums[v.action_type.index()] += v.confidence.clamp(0.0, 1.0);
        }
    }
    let total: f64 = sums.iter().sum();

    if votes.is_empty() || total <= 0.0 {
        let reason = if votes.is_empty() {
            "no engine votes".to_string()
        } else {
            "all engine votes carry zero confidence".to_string()
        };
        let mut d = Decision::blocked(DecisionStatus::BlockedByConfidence, vec![reason]);
        d.votes = votes;
        return d;
    }

    let mut winner = 0;
    for i in 1..sums.len() {
        if sums[i] > sums[winner] {
            winner = i;
        }
    }
    let action_type = ActionType::ALL[winner];
    let consensus = (sums[winner] / total).clamp(0.0, 1.0);

    let (status, reason) = if consensus >= min_confidence {
        (
            DecisionStatus::Approved,
            format!("consensus {:.3} for {}", consensus, action_type.as_str()),
        )
    } else {
        (
            DecisionStatus::BlockedByConfidence,
            format!(
                "consensus {:.3} below threshold {:.3}",
                consensus, min_confidence
            ),
        )
    };

    let action = if status == DecisionStatus::Approved {
        Action::pending(action_type, consensus)
    } else {
        Action::hold()
    };

    Decision {
        action,
        consensus_confidence: consensus,
        status,
        reasons: vec![reason],
        votes,
    }
}
