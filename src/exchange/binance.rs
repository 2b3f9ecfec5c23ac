use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::http::{settlement_from_millis, RestClient};
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

const BASE_URL: &str = "https://fapi.binance.com";

pub struct BinanceClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    contract_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    symbol: String,
    last_funding_rate: String,
    next_funding_time: i64,
    mark_price: String,
}

impl BinanceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("binance", BASE_URL, timeout)?,
        })
    }

    fn rate_from_index(&self, index: PremiumIndex) -> Option<FundingRate> {
        let rate = index.last_funding_rate.parse::<f64>().ok()?;
        let mark_price = index.mark_price.parse::<f64>().unwrap_or(0.0);
        let next_funding_time = settlement_from_millis(index.next_funding_time)?;

        Some(FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol: index.symbol,
            rate,
            mark_price,
            next_funding_time,
            quote_currency: "USDT".to_string(),
        })
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    fn name(&self) -> &str {
        self.rest.exchange()
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        vec![format!("{}USDT", token)]
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol.trim_end_matches("USDT").to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        let info: ExchangeInfo = self
            .rest
            .get_json_required("/fapi/v1/exchangeInfo", &[])
            .await?;

        let contracts = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.contract_type == "PERPETUAL" && s.status == "TRADING" && s.quote_asset == "USDT"
            })
            .take(limit)
            .map(|s| ContractInfo {
                exchange: self.name().to_string(),
                symbol: s.symbol,
                base_currency: s.base_asset,
                quote_currency: s.quote_asset,
            })
            .collect();
        Ok(contracts)
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        let index: Option<PremiumIndex> = self
            .rest
            .get_json("/fapi/v1/premiumIndex", &[("symbol", symbol)])
            .await?;
        Ok(index.and_then(|i| self.rate_from_index(i)))
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        let entries: Vec<PremiumIndex> = self
            .rest
            .get_json_required("/fapi/v1/premiumIndex", &[])
            .await?;

        let rates: Vec<FundingRate> = entries
            .into_iter()
            .filter(|e| e.symbol.ends_with("USDT"))
            .filter_map(|e| self.rate_from_index(e))
            .collect();
        debug!("Fetched {} funding rates from binance", rates.len());
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> BinanceClient {
        BinanceClient::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_premium_index_parsing() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "markPrice": "43250.10000000",
            "indexPrice": "43245.00000000",
            "lastFundingRate": "0.00010000",
            "nextFundingTime": 1700208000000,
            "interestRate": "0.00010000",
            "time": 1700180000000
        }"#;
        let index: PremiumIndex = serde_json::from_str(raw).unwrap();
        let rate = test_client().rate_from_index(index).unwrap();

        assert_eq!(rate.exchange, "binance");
        assert_eq!(rate.symbol, "BTCUSDT");
        assert!((rate.rate - 0.0001).abs() < 1e-12);
        assert!((rate.mark_price - 43250.1).abs() < 1e-6);
    }

    #[test]
    fn test_unscheduled_entry_is_skipped() {
        let index = PremiumIndex {
            symbol: "BTCUSDT_231229".to_string(),
            last_funding_rate: "0.0001".to_string(),
            next_funding_time: 0,
            mark_price: "43250.1".to_string(),
        };
        assert!(test_client().rate_from_index(index).is_none());
    }

    #[test]
    fn test_symbol_mapping() {
        let client = test_client();
        assert_eq!(client.symbol_variants("BTC"), vec!["BTCUSDT"]);
        assert_eq!(client.canonical_token("ETHUSDT"), "ETH");
    }
}
