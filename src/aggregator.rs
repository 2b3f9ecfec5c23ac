use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::arbitrage::SpreadDetector;
use crate::cache::{AsyncCache, CacheStats};
use crate::error::AggregatorError;
use crate::exchange::ExchangeManager;
use crate::types::{FundingRate, HedgingOpportunity, RatesSnapshot, SourceOutcome, TokenGroup};

const SNAPSHOT_KEY: &str = "grouped_rates";

/// Serves every funding-rate view from one cached fetch cycle, so a burst of
/// callers costs the venues a single round of requests per TTL window.
pub struct FundingRateAggregator {
    manager: Arc<ExchangeManager>,
    snapshots: AsyncCache<RatesSnapshot, AggregatorError>,
    token_rates: AsyncCache<Vec<FundingRate>, AggregatorError>,
}

impl FundingRateAggregator {
    pub fn new(manager: Arc<ExchangeManager>, cache_ttl: Duration) -> Self {
        Self {
            manager,
            snapshots: AsyncCache::new(cache_ttl),
            token_rates: AsyncCache::new(cache_ttl),
        }
    }

    /// The grouped view of one fetch cycle, cached under a single key.
    pub async fn snapshot(&self) -> Result<RatesSnapshot, AggregatorError> {
        self.snapshots
            .get_or_fetch(SNAPSHOT_KEY, || self.refresh_snapshot())
            .await
    }

    pub async fn grouped_rates(&self) -> Result<HashMap<String, TokenGroup>, AggregatorError> {
        Ok(self.snapshot().await?.groups)
    }

    /// Groups ordered by soonest settlement, then strongest rate, then token
    /// name. The order is total, so repeated calls within one TTL window
    /// rank identically.
    pub async fn rank_top_tokens(&self, n: usize) -> Result<Vec<TokenGroup>, AggregatorError> {
        let snapshot = self.snapshot().await?;
        let mut groups: Vec<TokenGroup> = snapshot.groups.into_values().collect();

        groups.sort_by(|a, b| {
            a.next_settlement()
                .cmp(&b.next_settlement())
                .then_with(|| {
                    let a_top = a.top_rate().map(|r| r.abs_rate()).unwrap_or(0.0);
                    let b_top = b.top_rate().map(|r| r.abs_rate()).unwrap_or(0.0);
                    b_top.partial_cmp(&a_top).unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.token.cmp(&b.token))
        });

        groups.truncate(n);
        Ok(groups)
    }

    pub async fn find_hedging_opportunities(
        &self,
        min_spread_pct: f64,
    ) -> Result<Vec<HedgingOpportunity>, AggregatorError> {
        let snapshot = self.snapshot().await?;
        let detector = SpreadDetector::new(min_spread_pct);
        Ok(detector.detect_all(snapshot.groups.values()))
    }

    /// Probes every venue for one token, through its own cache key. A token
    /// nobody lists is an empty list, not an error.
    pub async fn rates_for_token(&self, token: &str) -> Result<Vec<FundingRate>, AggregatorError> {
        let token = token.trim().to_uppercase();
        let key = format!("token_rates:{}", token);
        self.token_rates
            .get_or_fetch(&key, || self.refresh_token_rates(&token))
            .await
    }

    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = self.snapshots.stats();
        let token_stats = self.token_rates.stats();
        stats.total_entries += token_stats.total_entries;
        stats.valid_entries += token_stats.valid_entries;
        stats.expired_entries += token_stats.expired_entries;
        stats.in_flight += token_stats.in_flight;
        stats.entries.extend(token_stats.entries);
        stats
    }

    pub fn clear_cache(&self) {
        self.snapshots.clear();
        self.token_rates.clear();
    }

    pub fn invalidate(&self, key: &str) {
        self.snapshots.invalidate(key);
        self.token_rates.invalidate(key);
    }

    pub fn purge_expired(&self) -> usize {
        self.snapshots.purge_expired() + self.token_rates.purge_expired()
    }

    async fn refresh_snapshot(&self) -> Result<RatesSnapshot, AggregatorError> {
        let mut results: Vec<_> = self.manager.fetch_all_rates().await.into_iter().collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        let attempted = results.len();

        let mut sources = Vec::with_capacity(attempted);
        let mut groups: HashMap<String, TokenGroup> = HashMap::new();
        let mut succeeded = 0;

        for (exchange, fetch) in results {
            match fetch.result {
                Ok(rates) => {
                    succeeded += 1;
                    sources.push(SourceOutcome {
                        exchange: exchange.clone(),
                        ok: true,
                        rates: rates.len(),
                        elapsed_ms: fetch.elapsed_ms,
                        error: None,
                    });
                    self.merge_rates(&mut groups, &exchange, rates);
                }
                Err(e) => {
                    sources.push(SourceOutcome {
                        exchange,
                        ok: false,
                        rates: 0,
                        elapsed_ms: fetch.elapsed_ms,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if succeeded == 0 {
            warn!("All {} exchanges failed, no funding data this cycle", attempted);
            return Err(AggregatorError::AllExchangesFailed { attempted });
        }

        for group in groups.values_mut() {
            group.rates.sort_by(|a, b| {
                b.abs_rate()
                    .partial_cmp(&a.abs_rate())
                    .unwrap_or(Ordering::Equal)
            });
        }

        info!(
            "Aggregated {} tokens from {}/{} exchanges",
            groups.len(),
            succeeded,
            attempted
        );
        Ok(RatesSnapshot {
            groups,
            sources,
            fetched_at: Utc::now(),
        })
    }

    /// Folds one venue's rates into the token groups, keeping at most one
    /// rate per exchange per token. When a venue lists several instruments
    /// for one token, the strongest rate wins.
    fn merge_rates(
        &self,
        groups: &mut HashMap<String, TokenGroup>,
        exchange: &str,
        rates: Vec<FundingRate>,
    ) {
        let client = self.manager.client(exchange);
        for rate in rates {
            let token = match &client {
                Some(client) => client.canonical_token(&rate.symbol),
                None => rate.symbol.clone(),
            };
            if token.is_empty() {
                continue;
            }

            let group = groups.entry(token.clone()).or_insert_with(|| TokenGroup {
                token,
                rates: Vec::new(),
            });
            match group.rates.iter_mut().find(|r| r.exchange == rate.exchange) {
                Some(existing) => {
                    if rate.abs_rate() > existing.abs_rate() {
                        *existing = rate;
                    }
                }
                None => group.rates.push(rate),
            }
        }
    }

    async fn refresh_token_rates(
        &self,
        token: &str,
    ) -> Result<Vec<FundingRate>, AggregatorError> {
        let results = self.manager.fetch_token_rates(token).await;
        let attempted = results.len();

        let mut rates = Vec::new();
        let mut failed = 0;
        for (_, result) in results {
            match result {
                Ok(Some(rate)) => rates.push(rate),
                Ok(None) => {}
                // Already logged by the coordinator.
                Err(_) => failed += 1,
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(AggregatorError::AllExchangesFailed { attempted });
        }

        rates.sort_by(|a, b| {
            b.abs_rate()
                .partial_cmp(&a.abs_rate())
                .unwrap_or(Ordering::Equal)
        });
        debug!(
            "{} is listed on {} of {} exchanges",
            token,
            rates.len(),
            attempted
        );
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::exchange::mock::{self, MockExchange};
    use chrono::{DateTime, TimeZone, Utc};

    fn create_test_aggregator(clients: Vec<Arc<MockExchange>>) -> FundingRateAggregator {
        let mut manager = ExchangeManager::new(Duration::from_secs(5));
        for client in clients {
            manager.add_client(client);
        }
        FundingRateAggregator::new(Arc::new(manager), Duration::from_secs(30))
    }

    fn settle_at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, hour, 0, 0).unwrap()
    }

    fn rate_settling_at(exchange: &str, symbol: &str, rate: f64, hour: u32) -> FundingRate {
        FundingRate {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            rate,
            mark_price: 100.0,
            next_funding_time: settle_at(hour),
            quote_currency: "USDT".to_string(),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_working_venues() {
        let alpha = Arc::new(
            MockExchange::new("alpha").with_rates(vec![mock::rate("alpha", "BTCUSDT", 0.0001)]),
        );
        let beta = Arc::new(
            MockExchange::new("beta").failing(ExchangeError::unavailable("beta", "HTTP 503")),
        );
        let gamma = Arc::new(
            MockExchange::new("gamma").with_rates(vec![mock::rate("gamma", "BTCUSDT", 0.0003)]),
        );
        let aggregator = create_test_aggregator(vec![alpha, beta, gamma]);

        let snapshot = aggregator.snapshot().await.unwrap();
        let group = &snapshot.groups["BTC"];
        assert_eq!(group.exchange_count(), 2);
        assert_eq!(group.top_rate().unwrap().exchange, "gamma");

        assert_eq!(snapshot.contributing_exchanges(), vec!["alpha", "gamma"]);
        let failed = snapshot.sources.iter().find(|s| s.exchange == "beta").unwrap();
        assert!(!failed.ok);
        assert!(failed.error.as_deref().unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_total_failure_surfaces_and_is_not_cached() {
        let alpha = Arc::new(
            MockExchange::new("alpha").failing(ExchangeError::unavailable("alpha", "down")),
        );
        let beta = Arc::new(
            MockExchange::new("beta").failing(ExchangeError::timeout("beta", 5000)),
        );
        let aggregator = create_test_aggregator(vec![Arc::clone(&alpha), Arc::clone(&beta)]);

        let err = aggregator.snapshot().await.unwrap_err();
        assert_eq!(err, AggregatorError::AllExchangesFailed { attempted: 2 });
        assert_eq!(aggregator.cache_stats().total_entries, 0);

        // Next call goes straight back to the venues.
        alpha.set_failure(None);
        beta.set_failure(None);
        let snapshot = aggregator.snapshot().await.unwrap();
        assert!(snapshot.groups.is_empty());
        assert_eq!(alpha.bulk_calls(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_reused_within_ttl() {
        let alpha = Arc::new(
            MockExchange::new("alpha").with_rates(vec![mock::rate("alpha", "BTCUSDT", 0.0001)]),
        );
        let aggregator = create_test_aggregator(vec![Arc::clone(&alpha)]);

        aggregator.snapshot().await.unwrap();
        aggregator.grouped_rates().await.unwrap();
        aggregator.rank_top_tokens(5).await.unwrap();
        assert_eq!(alpha.bulk_calls(), 1);
    }

    #[tokio::test]
    async fn test_one_venue_dedupes_to_strongest_rate() {
        let alpha = Arc::new(MockExchange::new("alpha").with_rates(vec![
            mock::rate("alpha", "TOKUSDT", 0.0001),
            mock::rate("alpha", "TOK", -0.0005),
        ]));
        let aggregator = create_test_aggregator(vec![alpha]);

        let snapshot = aggregator.snapshot().await.unwrap();
        let group = &snapshot.groups["TOK"];
        assert_eq!(group.exchange_count(), 1);
        assert_eq!(group.rates[0].rate, -0.0005);
    }

    #[tokio::test]
    async fn test_ranking_is_total_and_idempotent() {
        let alpha = Arc::new(MockExchange::new("alpha").with_rates(vec![
            rate_settling_at("alpha", "AAAUSDT", 0.01, 16),
            rate_settling_at("alpha", "BBBUSDT", 0.0001, 8),
            rate_settling_at("alpha", "CCCUSDT", 0.005, 8),
            rate_settling_at("alpha", "DDDUSDT", -0.005, 8),
        ]));
        let aggregator = create_test_aggregator(vec![alpha]);

        let ranked = aggregator.rank_top_tokens(10).await.unwrap();
        let tokens: Vec<&str> = ranked.iter().map(|g| g.token.as_str()).collect();
        assert_eq!(tokens, vec!["CCC", "DDD", "BBB", "AAA"]);

        let again = aggregator.rank_top_tokens(10).await.unwrap();
        let same: Vec<&str> = again.iter().map(|g| g.token.as_str()).collect();
        assert_eq!(same, tokens);

        let truncated = aggregator.rank_top_tokens(2).await.unwrap();
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].token, "CCC");
    }

    #[tokio::test]
    async fn test_hedging_fixture_splits_long_and_short() {
        let ex1 = Arc::new(
            MockExchange::new("ex1").with_rates(vec![mock::rate("ex1", "TOKUSDT", 0.003)]),
        );
        let ex2 = Arc::new(
            MockExchange::new("ex2").with_rates(vec![mock::rate("ex2", "TOKUSDT", -0.002)]),
        );
        let aggregator = create_test_aggregator(vec![ex1, ex2]);

        let opportunities = aggregator.find_hedging_opportunities(0.1).await.unwrap();
        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert_eq!(opp.token, "TOK");
        assert_eq!(opp.long_exchange, "ex2");
        assert_eq!(opp.short_exchange, "ex1");
        assert!((opp.spread_pct - 0.5).abs() < 1e-9);

        assert!(aggregator
            .find_hedging_opportunities(0.6)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_token_rates_collects_partial_and_caches() {
        let alpha = Arc::new(
            MockExchange::new("alpha").with_rates(vec![mock::rate("alpha", "TOKUSDT", 0.0004)]),
        );
        let beta = Arc::new(MockExchange::new("beta"));
        let gamma = Arc::new(
            MockExchange::new("gamma").failing(ExchangeError::unavailable("gamma", "down")),
        );
        let aggregator = create_test_aggregator(vec![Arc::clone(&alpha), beta, gamma]);

        let rates = aggregator.rates_for_token("TOK").await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].exchange, "alpha");

        let probes = alpha.probed_symbols().len();
        aggregator.rates_for_token("TOK").await.unwrap();
        aggregator.rates_for_token("tok").await.unwrap();
        assert_eq!(alpha.probed_symbols().len(), probes);
    }

    #[tokio::test]
    async fn test_token_nobody_lists_is_empty_not_error() {
        let alpha = Arc::new(MockExchange::new("alpha"));
        let beta = Arc::new(MockExchange::new("beta"));
        let aggregator = create_test_aggregator(vec![alpha, beta]);

        let rates = aggregator.rates_for_token("ZZZ").await.unwrap();
        assert!(rates.is_empty());
    }

    #[tokio::test]
    async fn test_token_rates_error_when_every_probe_fails() {
        let alpha = Arc::new(
            MockExchange::new("alpha").failing(ExchangeError::unavailable("alpha", "down")),
        );
        let beta = Arc::new(
            MockExchange::new("beta").failing(ExchangeError::timeout("beta", 5000)),
        );
        let aggregator = create_test_aggregator(vec![alpha, beta]);

        let err = aggregator.rates_for_token("TOK").await.unwrap_err();
        assert_eq!(err, AggregatorError::AllExchangesFailed { attempted: 2 });
    }

    #[tokio::test]
    async fn test_cache_admin_covers_both_caches() {
        let alpha = Arc::new(
            MockExchange::new("alpha").with_rates(vec![mock::rate("alpha", "TOKUSDT", 0.0004)]),
        );
        let aggregator = create_test_aggregator(vec![Arc::clone(&alpha)]);

        aggregator.snapshot().await.unwrap();
        aggregator.rates_for_token("TOK").await.unwrap();
        let stats = aggregator.cache_stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.valid_entries, 2);

        aggregator.invalidate("grouped_rates");
        aggregator.snapshot().await.unwrap();
        assert_eq!(alpha.bulk_calls(), 2);

        aggregator.clear_cache();
        assert_eq!(aggregator.cache_stats().total_entries, 0);
    }
}
