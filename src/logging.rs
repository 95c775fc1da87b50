//! Structured logging for the decision core.
//!
//! Every record is one JSON line with a run id, a sequence number, a level and
//! a domain. Records are echoed to stdout and appended to the run directory
//! (`LOG_DIR/<run_id>/{events,trace,metrics}.jsonl`).
//!
//! Env knobs: `LOG_LEVEL`, `LOG_DOMAINS` (comma list or "all"), `LOG_DIR`,
//! `RUN_ID`, `LOG_STDOUT=0`, `PROFILE_SAMPLE`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::types::{Decision, ExecutionReport};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,    // snapshots, data-source failures
    Gate,      // admission filter verdicts
    Engine,    // per-engine votes and learning updates
    Consensus, // aggregated decisions
    Risk,      // sizing, leverage, margin
    Breaker,   // circuit breaker transitions
    Exec,      // routing and fills
    System,    // startup, shutdown, summaries
    Audit,     // decision digests for replay
    Metrics,   // performance summaries, mirrored to metrics.jsonl
    Profile,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Gate => "gate",
            Domain::Engine => "engine",
            Domain::Consensus => "consensus",
            Domain::Risk => "risk",
            Domain::Breaker => "breaker",
            Domain::Exec => "exec",
            Domain::System => "system",
            Domain::Audit => "audit",
            Domain::Metrics => "metrics",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

type Sink = Option<Mutex<BufWriter<File>>>;

#[derive(Debug)]
struct RunContext {
    run_id: String,
    run_dir: PathBuf,
    stdout: bool,
    events: Sink,
    trace: Sink,
    metrics: Sink,
}

fn open_sink(path: PathBuf) -> Sink {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let stdout = !matches!(std::env::var("LOG_STDOUT").as_deref(), Ok("0") | Ok("false"));
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "crate": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            metrics: open_sink(run_dir.join("metrics.jsonl")),
            run_id,
            run_dir,
            stdout,
        }
    })
}

/// Directory holding this run's manifest and jsonl sinks.
pub fn run_dir() -> &'static Path {
    &ensure_run_context().run_dir
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["cycle", "engine", "symbol", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(sink: &Sink, line: &str) {
    if let Some(writer) = sink {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }
}

/// Flush buffered sinks; call before process exit.
pub fn flush() {
    let ctx = ensure_run_context();
    for sink in [&ctx.events, &ctx.trace, &ctx.metrics] {
        if let Some(writer) = sink {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if component == Domain::Metrics.as_str() {
        write_line(&ctx.metrics, &line);
    }
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    if ctx.stdout {
        println!("{}", line);
    }
}

// =============================================================================
// Decision-path helpers
// =============================================================================

pub fn log_gate_block(symbol: &str, reasons: &[String], risk_score: f64) {
    log(
        Level::Info,
        Domain::Gate,
        "blocked",
        obj(&[
            ("symbol", v_str(symbol)),
            ("reasons", Value::Array(reasons.iter().map(|r| v_str(r)).collect())),
            ("risk_score", v_num(risk_score)),
        ]),
    );
}

pub fn log_vote(engine: &str, action: &str, confidence: f64) {
    log(
        Level::Debug,
        Domain::Engine,
        "vote",
        obj(&[
            ("engine", v_str(engine)),
            ("action", v_str(action)),
            ("confidence", v_num(confidence)),
        ]),
    );
}

/// One record per cycle with the final status and every vote behind it.
pub fn log_decision(cycle: u64, decision: &Decision) {
    let votes: Vec<Value> = decision
        .votes
        .iter()
        .map(|v| json!({"engine": v.engine_name, "action": v.action_type.as_str(), "confidence": v.confidence}))
        .collect();
    log(
        Level::Info,
        Domain::Consensus,
        "decision",
        obj(&[
            ("cycle", json!(cycle)),
            ("status", v_str(decision.status.as_str())),
            ("action", v_str(decision.action.action_type.as_str())),
            ("consensus", v_num(decision.consensus_confidence)),
            ("size", v_num(decision.action.size)),
            ("leverage", v_num(decision.action.leverage)),
            ("reasons", Value::Array(decision.reasons.iter().map(|r| v_str(r)).collect())),
            ("votes", Value::Array(votes)),
        ]),
    );
}

pub fn log_breaker_trip(reason: &str, drawdown: f64, daily_loss_pct: f64, loss_streak: u32) {
    log(
        Level::Error,
        Domain::Breaker,
        "tripped",
        obj(&[
            ("msg", v_str("circuit breaker tripped; all further cycles blocked")),
            ("reason", v_str(reason)),
            ("drawdown", v_num(drawdown)),
            ("daily_loss_pct", v_num(daily_loss_pct)),
            ("loss_streak", json!(loss_streak)),
        ]),
    );
}

pub fn log_execution(report: &ExecutionReport) {
    let level = if report.filled { Level::Info } else { Level::Warn };
    log(
        level,
        Domain::Exec,
        "report",
        obj(&[
            ("venue", v_str(report.venue.as_str())),
            ("filled", Value::Bool(report.filled)),
            ("partial", Value::Bool(report.is_partial())),
            ("fill_price", v_num(report.fill_price)),
            ("slippage", v_num(report.realized_slippage)),
            ("fees", v_num(report.fees_paid)),
            ("latency_ms", v_num(report.latency_ms)),
            ("requested_size", v_num(report.requested_size)),
            ("filled_size", v_num(report.filled_size)),
            ("note", report.note.as_deref().map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

// =============================================================================
// Audit Trail Logs
// =============================================================================

/// SHA-256 over the serialized decision; identical inputs replay to identical digests.
pub fn decision_digest(decision: &Decision) -> String {
    let bytes = serde_json::to_vec(decision).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

pub fn log_audit(cycle: u64, decision: &Decision) {
    log(
        Level::Info,
        Domain::Audit,
        "decision_digest",
        obj(&[
            ("cycle", json!(cycle)),
            ("status", v_str(decision.status.as_str())),
            ("digest", v_str(&decision_digest(decision))),
        ]),
    );
}

pub fn log_session_summary(
    cycles: u64,
    total_trades: u64,
    win_rate: f64,
    total_pnl: f64,
    return_pct: f64,
    breaker_status: &str,
) {
    log(
        Level::Info,
        Domain::Metrics,
        "session_summary",
        obj(&[
            ("cycles", json!(cycles)),
            ("total_trades", json!(total_trades)),
            ("win_rate", v_num(win_rate)),
            ("total_pnl", v_num(total_pnl)),
            ("return_pct", v_num(return_pct)),
            ("breaker", v_str(breaker_status)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits `elapsed_ms` for the enclosing scope on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            context: None,
            started: Instant::now(),
            enabled: Self::should_sample(),
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
