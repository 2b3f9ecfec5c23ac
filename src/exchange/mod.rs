pub mod http;
pub mod traits;

pub mod binance;
pub mod bingx;
pub mod bitget;
pub mod bitmart;
pub mod bybit;
pub mod gateio;
pub mod kucoin;
pub mod mexc;
pub mod okx;

#[cfg(test)]
pub mod mock;

pub use traits::Exchange;

pub use binance::BinanceClient;
pub use bingx::BingxClient;
pub use bitget::BitgetClient;
pub use bitmart::BitmartClient;
pub use bybit::BybitClient;
pub use gateio::GateioClient;
pub use kucoin::KucoinClient;
pub use mexc::MexcClient;
pub use okx::OkxClient;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ExchangesConfig;
use crate::error::ExchangeError;
use crate::types::FundingRate;

/// What one venue produced within a fan-out cycle, with the wall time spent.
#[derive(Debug)]
pub struct SourceFetch {
    pub result: Result<Vec<FundingRate>, ExchangeError>,
    pub elapsed_ms: u64,
}

pub struct ExchangeManager {
    clients: Vec<Arc<dyn Exchange>>,
    request_timeout: Duration,
}

impl ExchangeManager {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            clients: Vec::new(),
            request_timeout,
        }
    }

    pub fn add_client(&mut self, client: Arc<dyn Exchange>) {
        self.clients.push(client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    pub fn client(&self, name: &str) -> Option<Arc<dyn Exchange>> {
        self.clients.iter().find(|c| c.name() == name).cloned()
    }

    /// One bulk request per venue, all in parallel, none allowed to hold the
    /// cycle up past the configured timeout.
    pub async fn fetch_all_rates(&self) -> HashMap<String, SourceFetch> {
        let limit = self.request_timeout;
        let tasks = self.clients.iter().map(|client| {
            let client = Arc::clone(client);
            async move {
                let started = Instant::now();
                let result = match timeout(limit, client.get_all_funding_rates()).await {
                    Ok(result) => result,
                    Err(_) => Err(ExchangeError::timeout(
                        client.name(),
                        limit.as_millis() as u64,
                    )),
                };
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(rates) => info!(
                        "Fetched {} funding rates from {} in {}ms",
                        rates.len(),
                        client.name(),
                        elapsed_ms
                    ),
                    Err(e) => warn!(
                        "Fetch from {} failed after {}ms ({}): {}",
                        client.name(),
                        elapsed_ms,
                        e.kind(),
                        e
                    ),
                }
                (client.name().to_string(), SourceFetch { result, elapsed_ms })
            }
        });

        join_all(tasks).await.into_iter().collect()
    }

    /// Probes every venue for one canonical token.
    pub async fn fetch_token_rates(
        &self,
        token: &str,
    ) -> HashMap<String, Result<Option<FundingRate>, ExchangeError>> {
        let limit = self.request_timeout;
        let tasks = self.clients.iter().map(|client| {
            let client = Arc::clone(client);
            async move {
                let result = match timeout(limit, client.funding_rate(token)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExchangeError::timeout(
                        client.name(),
                        limit.as_millis() as u64,
                    )),
                };
                if let Err(e) = &result {
                    debug!("Probe for {} on {} failed: {}", token, client.name(), e);
                }
                (client.name().to_string(), result)
            }
        });

        join_all(tasks).await.into_iter().collect()
    }

    pub async fn health_check_all(&self) -> usize {
        let checks = self.clients.iter().map(|client| async move {
            let available = client.is_available().await;
            if available {
                debug!("{} passed the health check", client.name());
            } else {
                warn!("{} failed the health check", client.name());
            }
            available
        });

        let healthy = join_all(checks).await.into_iter().filter(|ok| *ok).count();
        info!(
            "Health check: {}/{} exchanges reachable",
            healthy,
            self.clients.len()
        );
        healthy
    }
}

pub fn create_exchange_clients(config: &ExchangesConfig) -> Result<ExchangeManager> {
    let request_timeout = Duration::from_secs(config.request_timeout_seconds);
    let mut manager = ExchangeManager::new(request_timeout);

    for name in &config.enabled {
        match name.as_str() {
            "binance" => manager.add_client(Arc::new(BinanceClient::new(request_timeout)?)),
            "bybit" => manager.add_client(Arc::new(BybitClient::new(request_timeout)?)),
            "mexc" => manager.add_client(Arc::new(MexcClient::new(request_timeout)?)),
            "gate" => manager.add_client(Arc::new(GateioClient::new(request_timeout)?)),
            "kucoin" => manager.add_client(Arc::new(KucoinClient::new(request_timeout)?)),
            "bitget" => manager.add_client(Arc::new(BitgetClient::new(request_timeout)?)),
            "bingx" => manager.add_client(Arc::new(BingxClient::new(request_timeout)?)),
            "bitmart" => manager.add_client(Arc::new(BitmartClient::new(request_timeout)?)),
            "okx" => manager.add_client(Arc::new(OkxClient::new(request_timeout)?)),
            _ => {
                warn!("Unknown exchange in configuration: {}", name);
            }
        }
    }

    Ok(manager)
}
