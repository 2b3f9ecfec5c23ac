use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::error::ExchangeError;
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

/// Scriptable venue for coordinator and aggregator tests.
pub struct MockExchange {
    name: String,
    rates: Mutex<Vec<FundingRate>>,
    variants: Mutex<Option<Vec<String>>>,
    failure: Mutex<Option<ExchangeError>>,
    delay: Mutex<Option<Duration>>,
    probed: Mutex<Vec<String>>,
    bulk_calls: AtomicUsize,
}

impl MockExchange {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rates: Mutex::new(Vec::new()),
            variants: Mutex::new(None),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            probed: Mutex::new(Vec::new()),
            bulk_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_rates(self, rates: Vec<FundingRate>) -> Self {
        *self.rates.lock().unwrap() = rates;
        self
    }

    /// Fixed probe spellings returned for every token, overriding the
    /// default `{token}USDT`.
    pub fn with_variants(self, variants: Vec<&str>) -> Self {
        *self.variants.lock().unwrap() = Some(variants.into_iter().map(String::from).collect());
        self
    }

    pub fn failing(self, error: ExchangeError) -> Self {
        *self.failure.lock().unwrap() = Some(error);
        self
    }

    pub fn delayed(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_failure(&self, error: Option<ExchangeError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn probed_symbols(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn scripted_failure(&self) -> Option<ExchangeError> {
        self.failure.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        match self.variants.lock().unwrap().clone() {
            Some(variants) => variants,
            None => vec![format!("{}USDT", token)],
        }
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol.trim_end_matches("USDT").to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        self.pause().await;
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        let contracts = self
            .rates
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .map(|r| ContractInfo {
                exchange: self.name.clone(),
                symbol: r.symbol.clone(),
                base_currency: self.canonical_token(&r.symbol),
                quote_currency: "USDT".to_string(),
            })
            .collect();
        Ok(contracts)
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        self.pause().await;
        self.probed.lock().unwrap().push(symbol.to_string());
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        let found = self
            .rates
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.symbol == symbol)
            .cloned();
        Ok(found)
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        self.pause().await;
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        Ok(self.rates.lock().unwrap().clone())
    }
}

pub fn rate(exchange: &str, symbol: &str, value: f64) -> FundingRate {
    rate_settling_in(exchange, symbol, value, 60)
}

pub fn rate_settling_in(exchange: &str, symbol: &str, value: f64, minutes: i64) -> FundingRate {
    FundingRate {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        rate: value,
        mark_price: 100.0,
        next_funding_time: Utc::now() + ChronoDuration::minutes(minutes),
        quote_currency: "USDT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_variant_walk_stops_at_first_listed() {
        let mock = MockExchange::new("mockex")
            .with_variants(vec!["TOK-A", "TOK-B", "TOK-C"])
            .with_rates(vec![rate("mockex", "TOK-B", 0.0001)]);

        let found = mock.funding_rate("TOK").await.unwrap().unwrap();
        assert_eq!(found.symbol, "TOK-B");
        assert_eq!(mock.probed_symbols(), vec!["TOK-A", "TOK-B"]);
    }

    #[tokio::test]
    async fn test_variant_walk_exhausts_to_none() {
        let mock = MockExchange::new("mockex").with_variants(vec!["TOK-A", "TOK-B"]);

        assert!(mock.funding_rate("TOK").await.unwrap().is_none());
        assert_eq!(mock.probed_symbols(), vec!["TOK-A", "TOK-B"]);
    }

    #[tokio::test]
    async fn test_variant_walk_aborts_on_failure() {
        let mock = MockExchange::new("mockex")
            .with_variants(vec!["TOK-A", "TOK-B"])
            .failing(ExchangeError::unavailable("mockex", "down"));

        let result = mock.funding_rate("TOK").await;
        assert!(result.is_err());
        assert_eq!(mock.probed_symbols(), vec!["TOK-A"]);
    }

    #[tokio::test]
    async fn test_availability_follows_scripted_failure() {
        let mock = MockExchange::new("mockex").with_rates(vec![rate("mockex", "BTCUSDT", 0.0001)]);
        assert!(mock.is_available().await);

        mock.set_failure(Some(ExchangeError::unavailable("mockex", "down")));
        assert!(!mock.is_available().await);
    }

    #[tokio::test]
    async fn test_availability_requires_a_listed_contract() {
        let mock = MockExchange::new("mockex");
        assert!(!mock.is_available().await);
    }
}
