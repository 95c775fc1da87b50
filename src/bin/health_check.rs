//! Exit 0 when the metrics document exists and is well formed, 1 otherwise.

use hyperaccum::metrics::check_health;

fn main() {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("METRICS_PATH").ok())
        .unwrap_or_else(|| "data/performance_stats.json".to_string());

    match check_health(&path) {
        Ok(doc) => {
            println!("health check passed");
            println!("  mode: {}", doc.mode);
            println!("  cycles: {}", doc.cycle_count);
            println!("  trades: {}", doc.total_trades);
            println!("  breaker: {}", doc.circuit_breaker_status.as_str());
            if let Some(reason) = doc.trip_reason {
                println!("  trip_reason: {}", reason.as_str());
            }
        }
        Err(err) => {
            eprintln!("health check failed: {:#}", err);
            std::process::exit(1);
        }
    }
}
