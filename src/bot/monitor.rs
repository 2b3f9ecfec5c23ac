use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::aggregator::FundingRateAggregator;
use crate::config::Config;
use crate::error::AggregatorError;
use crate::types::HedgingOpportunity;

const ALERT_CHANNEL_CAPACITY: usize = 64;
const ERROR_BACKOFF: Duration = Duration::from_secs(30);
const MAINTENANCE_EVERY: u64 = 100;

/// What the monitoring loop found noteworthy. Formatting and delivery are a
/// downstream concern; subscribers decide what to do with these.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    HighFundingRate {
        token: String,
        exchange: String,
        rate_pct: f64,
        next_funding_time: DateTime<Utc>,
    },
    HedgingOpportunity(HedgingOpportunity),
}

#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Periodically re-ranks the market and broadcasts alerts for rates above the
/// configured threshold and for viable hedges, with a per-token cooldown so
/// one hot token does not spam the channel every cycle.
pub struct MonitorService {
    aggregator: Arc<FundingRateAggregator>,
    config: Config,
    alerts: broadcast::Sender<AlertEvent>,
    cooldowns: HashMap<String, Instant>,
    running: Arc<AtomicBool>,
}

impl MonitorService {
    pub fn new(
        aggregator: Arc<FundingRateAggregator>,
        config: Config,
    ) -> (Self, broadcast::Receiver<AlertEvent>) {
        let (alerts, receiver) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let service = Self {
            aggregator,
            config,
            alerts,
            cooldowns: HashMap::new(),
            running: Arc::new(AtomicBool::new(true)),
        };
        (service, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub async fn run(&mut self) {
        let mut ticker = interval(Duration::from_secs(
            self.config.monitor.check_interval_seconds,
        ));
        let mut cycle_count = 0u64;

        info!(
            "Starting monitoring loop with {} second intervals",
            self.config.monitor.check_interval_seconds
        );

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            cycle_count += 1;

            debug!("Starting monitoring cycle #{}", cycle_count);

            match self.run_single_cycle().await {
                Ok(emitted) => {
                    debug!(
                        "Monitoring cycle #{} completed, {} alerts emitted",
                        cycle_count, emitted
                    );
                }
                Err(e) => {
                    error!("Error in monitoring cycle #{}: {}", cycle_count, e);
                    warn!("Backing off for {:?} after a failed cycle", ERROR_BACKOFF);
                    sleep(ERROR_BACKOFF).await;
                }
            }

            if cycle_count % MAINTENANCE_EVERY == 0 {
                self.perform_maintenance();
            }
        }

        info!("Monitoring loop stopped");
    }

    async fn run_single_cycle(&mut self) -> Result<usize, AggregatorError> {
        let limit = self.config.aggregator.top_contracts_limit;
        let threshold = self.config.monitor.alert_threshold_pct;
        let groups = self.aggregator.rank_top_tokens(limit).await?;
        let mut emitted = 0;

        for group in &groups {
            let top = match group.top_rate() {
                Some(rate) => rate,
                None => continue,
            };
            if top.rate_percentage().abs() < threshold {
                continue;
            }
            let key = format!("rate:{}", group.token);
            if !self.cooldown_elapsed(&key) {
                continue;
            }
            self.arm_cooldown(key);
            info!(
                "High funding rate on {}: {:.4}% at {}",
                group.token,
                top.rate_percentage(),
                top.exchange
            );
            self.emit(AlertEvent::HighFundingRate {
                token: group.token.clone(),
                exchange: top.exchange.clone(),
                rate_pct: top.rate_percentage(),
                next_funding_time: top.next_funding_time,
            });
            emitted += 1;
        }

        let opportunities = self
            .aggregator
            .find_hedging_opportunities(self.config.monitor.min_spread_pct)
            .await?;
        for opportunity in opportunities {
            let key = format!("hedge:{}", opportunity.token);
            if !self.cooldown_elapsed(&key) {
                continue;
            }
            self.arm_cooldown(key);
            info!(
                "Hedging opportunity on {}: long {} / short {}, spread {:.4}%",
                opportunity.token,
                opportunity.long_exchange,
                opportunity.short_exchange,
                opportunity.spread_pct
            );
            self.emit(AlertEvent::HedgingOpportunity(opportunity));
            emitted += 1;
        }

        if emitted == 0 {
            debug!("All rates below the {}% threshold", threshold);
        }
        Ok(emitted)
    }

    fn cooldown_elapsed(&self, key: &str) -> bool {
        let window = Duration::from_secs(self.config.monitor.alert_cooldown_seconds);
        match self.cooldowns.get(key) {
            Some(last) => last.elapsed() >= window,
            None => true,
        }
    }

    fn arm_cooldown(&mut self, key: String) {
        self.cooldowns.insert(key, Instant::now());
    }

    fn emit(&self, event: AlertEvent) {
        // A closed channel only means nobody is listening right now.
        let _ = self.alerts.send(event);
    }

    fn perform_maintenance(&mut self) {
        info!("Performing periodic maintenance");
        let purged = self.aggregator.purge_expired();
        let window = Duration::from_secs(self.config.monitor.alert_cooldown_seconds);
        self.cooldowns.retain(|_, last| last.elapsed() < window);
        debug!("Maintenance removed {} expired cache entries", purged);
    }
}
