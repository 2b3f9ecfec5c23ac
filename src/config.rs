use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub exchanges: ExchangesConfig,
    pub cache: CacheConfig,
    pub aggregator: AggregatorConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExchangesConfig {
    pub enabled: Vec<String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AggregatorConfig {
    pub top_contracts_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    pub check_interval_seconds: u64,
    pub alert_threshold_pct: f64,
    pub alert_cooldown_seconds: u64,
    pub min_spread_pct: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

/// Deployment files sometimes carry `VALUE  # comment` in env vars; keep the
/// value, drop the comment.
fn strip_inline_comment(raw: &str) -> &str {
    raw.split('#').next().unwrap_or(raw).trim()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("FUNDING").separator("__"));

        // Override cache TTL from environment if present
        if let Ok(raw) = std::env::var("CACHE_TTL") {
            if let Ok(ttl) = strip_inline_comment(&raw).parse::<u64>() {
                settings = settings.set_override("cache.ttl_seconds", ttl)?;
            }
        }

        // Override log level from environment if present
        if let Ok(raw) = std::env::var("LOG_LEVEL") {
            let level = strip_inline_comment(&raw);
            if !level.is_empty() {
                settings = settings.set_override("logging.level", level)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }
}
