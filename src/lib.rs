pub mod aggregator;
pub mod arbitrage;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::Config;
pub use types::*;
