use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use funding_arbitrage_bot::{
    aggregator::FundingRateAggregator,
    bot::{AlertEvent, MonitorService},
    config::Config,
    exchange::create_exchange_clients,
};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // The log level comes from config, so load it before the subscriber.
    let config = Config::load()?;
    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Funding Rate Arbitrage Bot");
    info!("Configuration loaded successfully");

    // Initialize exchange clients
    let manager = create_exchange_clients(&config.exchanges)?;
    if manager.is_empty() {
        anyhow::bail!("No exchange clients configured");
    }
    info!("Exchange clients initialized: {} venues", manager.len());

    let manager = Arc::new(manager);
    let healthy = manager.health_check_all().await;
    if healthy == 0 {
        warn!("No exchange passed the initial health check, data may be delayed");
    }

    let aggregator = Arc::new(FundingRateAggregator::new(
        Arc::clone(&manager),
        Duration::from_secs(config.cache.ttl_seconds),
    ));

    let (mut monitor, mut alerts) = MonitorService::new(Arc::clone(&aggregator), config);
    let shutdown = monitor.shutdown_handle();

    let alert_task = tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(AlertEvent::HighFundingRate {
                    token,
                    exchange,
                    rate_pct,
                    next_funding_time,
                }) => {
                    info!(
                        "ALERT {}: {:.4}% on {}, next funding at {}",
                        token, rate_pct, exchange, next_funding_time
                    );
                }
                Ok(AlertEvent::HedgingOpportunity(opp)) => {
                    info!(
                        "HEDGE {}: long {} / short {} for a {:.4}% spread",
                        opp.token, opp.long_exchange, opp.short_exchange, opp.spread_pct
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Alert consumer lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Handle graceful shutdown
    tokio::select! {
        _ = monitor.run() => {
            info!("Monitoring loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            shutdown.shutdown();
        }
    }

    drop(monitor);
    let _ = alert_task.await;

    info!("Funding Rate Arbitrage Bot shutdown complete");
    Ok(())
}
