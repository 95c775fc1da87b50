//! Runtime configuration.
//!
//! Every component owns a small config struct with conservative defaults.
//! `Config::load()` reads an optional JSON file (`CONFIG_PATH`) and then applies
//! environment overrides, so a bare environment always yields a usable setup.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_mev_risk: f64,
    pub max_latency_ms: f64,
    pub min_volume_24h: f64,
    /// (ask - bid) / price
    pub max_spread_pct: f64,
    /// |price - ema_fast| / ema_fast
    pub max_ema_deviation_pct: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_mev_risk: 0.7,
            max_latency_ms: 500.0,
            min_volume_24h: 1000.0,
            max_spread_pct: 0.05,
            max_ema_deviation_pct: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub ewma_alpha: f64,
    /// Fraction of full Kelly actually deployed
    pub kelly_fraction: f64,
    /// Allocation used before any outcome has been recorded
    pub min_allocation: f64,
    pub max_position_pct: f64,
    /// Crossover magnitude that maps to ~76% confidence (tanh(1))
    pub signal_scale: f64,
    /// Crossovers smaller than this vote HOLD
    pub neutral_band: f64,
    pub variance_floor: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.1,
            kelly_fraction: 0.25,
            min_allocation: 0.01,
            max_position_pct: 0.35,
            signal_scale: 0.005,
            neutral_band: 0.0005,
            variance_floor: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub discount: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
    pub momentum_band: f64,
    pub vol_low: f64,
    pub vol_high: f64,
    pub gap_scale: f64,
    pub explore_confidence: f64,
    pub seed: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.95,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
            momentum_band: 0.002,
            vol_low: 0.02,
            vol_high: 0.05,
            gap_scale: 0.05,
            explore_confidence: 0.3,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub min_confidence: f64,
    pub parallel_scoring: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            parallel_scoring: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    pub max_position_pct: f64,
    pub max_leverage: f64,
    /// Consensus above this may lever up
    pub high_confidence: f64,
    pub volatility_threshold: f64,
    pub volatility_scale_floor: f64,
    pub volatile_leverage_haircut: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            max_position_pct: 0.35,
            max_leverage: 5.0,
            high_confidence: 0.9,
            volatility_threshold: 0.05,
            volatility_scale_floor: 0.25,
            volatile_leverage_haircut: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub initial_capital: f64,
    pub drawdown: f64,
    pub max_daily_loss_pct: f64,
    pub consecutive_losses_limit: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100.0,
            drawdown: 0.25,
            max_daily_loss_pct: 0.10,
            consecutive_losses_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub latency_mean_ms: f64,
    pub latency_spread_ms: f64,
    pub latency_floor_ms: f64,
    pub tip_lamports: f64,
    pub reference_tip_lamports: f64,
    pub base_inclusion: f64,
    pub congestion_weight: f64,
    pub base_slippage: f64,
    pub size_impact: f64,
    pub network_fee_lamports: f64,
    pub seed: u64,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            latency_mean_ms: 150.0,
            latency_spread_ms: 50.0,
            latency_floor_ms: 50.0,
            tip_lamports: 10_000.0,
            reference_tip_lamports: 10_000.0,
            base_inclusion: 0.95,
            congestion_weight: 0.5,
            base_slippage: 0.001,
            size_impact: 1.0,
            network_fee_lamports: 5_000.0,
            seed: 11,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwapConfig {
    /// 0 = derive from size / max_slice_pct
    pub slices: u32,
    pub max_slices: u32,
    pub max_slice_pct: f64,
    pub slippage_cap_pct: f64,
    pub fee_pct: f64,
    pub slice_interval_ms: u64,
}

impl Default for TwapConfig {
    fn default() -> Self {
        Self {
            slices: 0,
            max_slices: 20,
            max_slice_pct: 0.05,
            slippage_cap_pct: 0.01,
            fee_pct: 0.0005,
            slice_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePolicy {
    Auto,
    Bundle,
    Twap,
}

impl FromStr for RoutePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(RoutePolicy::Auto),
            "bundle" | "jito" => Ok(RoutePolicy::Bundle),
            "twap" => Ok(RoutePolicy::Twap),
            other => bail!("unknown route policy '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub policy: RoutePolicy,
    pub auto_bundle_mev_risk: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            policy: RoutePolicy::Auto,
            auto_bundle_mev_risk: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub symbol: String,
    pub metrics_path: String,
    pub seed: u64,
    pub gate: GateConfig,
    pub allocation: AllocationConfig,
    pub learning: LearningConfig,
    pub consensus: ConsensusConfig,
    pub sizer: SizerConfig,
    pub breaker: BreakerConfig,
    pub bundle: BundleConfig,
    pub twap: TwapConfig,
    pub router: RouterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "SOL/USD".to_string(),
            metrics_path: "data/performance_stats.json".to_string(),
            seed: 42,
            gate: GateConfig::default(),
            allocation: AllocationConfig::default(),
            learning: LearningConfig::default(),
            consensus: ConsensusConfig::default(),
            sizer: SizerConfig::default(),
            breaker: BreakerConfig::default(),
            bundle: BundleConfig::default(),
            twap: TwapConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// File (if `CONFIG_PATH` is set) then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SYMBOL") {
            self.symbol = v;
        }
        if let Ok(v) = std::env::var("METRICS_PATH") {
            self.metrics_path = v;
        }
        self.seed = env_parse("SEED").unwrap_or(self.seed);

        let g = &mut self.gate;
        g.max_mev_risk = env_parse("MAX_MEV_RISK").unwrap_or(g.max_mev_risk);
        g.max_latency_ms = env_parse("MAX_LATENCY_MS").unwrap_or(g.max_latency_ms);
        g.min_volume_24h = env_parse("MIN_VOLUME_24H").unwrap_or(g.min_volume_24h);
        g.max_spread_pct = env_parse("MAX_SPREAD_PCT").unwrap_or(g.max_spread_pct);
        g.max_ema_deviation_pct = env_parse("MAX_EMA_DEV_PCT").unwrap_or(g.max_ema_deviation_pct);

        let a = &mut self.allocation;
        a.ewma_alpha = env_parse("EWMA_ALPHA").unwrap_or(a.ewma_alpha);
        a.kelly_fraction = env_parse("KELLY_FRACTION").unwrap_or(a.kelly_fraction);
        a.min_allocation = env_parse("MIN_ALLOCATION").unwrap_or(a.min_allocation);

        let l = &mut self.learning;
        l.learning_rate = env_parse("LEARNING_RATE").unwrap_or(l.learning_rate);
        l.discount = env_parse("DISCOUNT").unwrap_or(l.discount);
        l.epsilon = env_parse("EPSILON").unwrap_or(l.epsilon);
        l.epsilon_decay = env_parse("EPSILON_DECAY").unwrap_or(l.epsilon_decay);
        l.min_epsilon = env_parse("MIN_EPSILON").unwrap_or(l.min_epsilon);

        let c = &mut self.consensus;
        c.min_confidence = env_parse("MIN_CONFIDENCE").unwrap_or(c.min_confidence);
        c.parallel_scoring = env_flag("PARALLEL_SCORING").unwrap_or(c.parallel_scoring);

        let s = &mut self.sizer;
        s.max_leverage = env_parse("MAX_LEVERAGE").unwrap_or(s.max_leverage);
        s.high_confidence = env_parse("HIGH_CONFIDENCE").unwrap_or(s.high_confidence);
        s.volatility_threshold = env_parse("VOL_THRESHOLD").unwrap_or(s.volatility_threshold);
        // MAX_POS_PCT moves both caps; MAX_ALLOC_PCT only the Kelly cap
        if let Some(v) = env_parse::<f64>("MAX_POS_PCT") {
            self.sizer.max_position_pct = v;
            self.allocation.max_position_pct = v;
        }
        if let Some(v) = env_parse::<f64>("MAX_ALLOC_PCT") {
            self.allocation.max_position_pct = v;
        }

        let b = &mut self.breaker;
        b.initial_capital = env_parse("INITIAL_CAPITAL").unwrap_or(b.initial_capital);
        b.drawdown = env_parse("BREAKER_DRAWDOWN").unwrap_or(b.drawdown);
        b.max_daily_loss_pct = env_parse("MAX_DAILY_LOSS_PCT").unwrap_or(b.max_daily_loss_pct);
        b.consecutive_losses_limit = env_parse("CONSECUTIVE_LOSSES").unwrap_or(b.consecutive_losses_limit);

        let j = &mut self.bundle;
        j.tip_lamports = env_parse("JITO_TIP_LAMPORTS").unwrap_or(j.tip_lamports);
        j.latency_mean_ms = env_parse("BUNDLE_LATENCY_MS").unwrap_or(j.latency_mean_ms);

        let t = &mut self.twap;
        t.slices = env_parse("TWAP_SLICES").unwrap_or(t.slices);
        t.max_slice_pct = env_parse("TWAP_MAX_SLICE_PCT").unwrap_or(t.max_slice_pct);
        t.slippage_cap_pct = env_parse("TWAP_SLIPPAGE_CAP").unwrap_or(t.slippage_cap_pct);
        t.slice_interval_ms = env_parse("TWAP_INTERVAL_MS").unwrap_or(t.slice_interval_ms);

        if let Some(p) = std::env::var("ROUTE").ok().and_then(|v| v.parse().ok()) {
            self.router.policy = p;
        }
    }

    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, v: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&v) {
                bail!("{} must be within [0, 1], got {}", name, v);
            }
            Ok(())
        }
        unit("gate.max_mev_risk", self.gate.max_mev_risk)?;
        unit("allocation.ewma_alpha", self.allocation.ewma_alpha)?;
        unit("allocation.max_position_pct", self.allocation.max_position_pct)?;
        unit("learning.learning_rate", self.learning.learning_rate)?;
        unit("learning.epsilon", self.learning.epsilon)?;
        unit("consensus.min_confidence", self.consensus.min_confidence)?;
        unit("sizer.max_position_pct", self.sizer.max_position_pct)?;
        unit("sizer.high_confidence", self.sizer.high_confidence)?;
        unit("sizer.volatility_scale_floor", self.sizer.volatility_scale_floor)?;
        unit("sizer.volatile_leverage_haircut", self.sizer.volatile_leverage_haircut)?;
        unit("twap.slippage_cap_pct", self.twap.slippage_cap_pct)?;
        unit("breaker.drawdown", self.breaker.drawdown)?;
        if !(0.0..1.0).contains(&self.learning.discount) {
            bail!("learning.discount must be within [0, 1), got {}", self.learning.discount);
        }
        if self.sizer.max_leverage < 1.0 {
            bail!("sizer.max_leverage must be >= 1, got {}", self.sizer.max_leverage);
        }
        if self.breaker.initial_capital <= 0.0 {
            bail!("breaker.initial_capital must be positive");
        }
        if self.breaker.consecutive_losses_limit == 0 {
            bail!("breaker.consecutive_losses_limit must be at least 1");
        }
        if self.twap.max_slice_pct <= 0.0 || self.twap.max_slices == 0 {
            bail!("twap slicing requires max_slice_pct > 0 and max_slices >= 1");
        }
        Ok(())
    }
}
