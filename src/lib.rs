pub mod adapter;
pub mod allocation;
pub mod breaker;
pub mod config;
pub mod consensus;
pub mod execution;
pub mod gate;
pub mod learning;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod sim;
pub mod sizing;
pub mod types;

pub use config::Config;
pub use pipeline::TradingCore;
