use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::http::{next_funding_boundary, RestClient};
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

const BASE_URL: &str = "https://api-futures.kucoin.com";
const OK_CODE: &str = "200000";

pub struct KucoinClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct ActiveContracts {
    code: String,
    #[serde(default)]
    data: Vec<KucoinContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinContract {
    symbol: String,
    #[serde(default)]
    base_currency: String,
}

#[derive(Debug, Deserialize)]
struct FundingCurrent {
    code: String,
    #[serde(default)]
    data: Option<FundingValue>,
}

#[derive(Debug, Deserialize)]
struct FundingValue {
    #[serde(default)]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    code: String,
    #[serde(default)]
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(default)]
    price: Option<String>,
}

impl KucoinClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("kucoin", BASE_URL, timeout)?,
        })
    }

    async fn last_price(&self, symbol: &str) -> f64 {
        let ticker: Result<Option<TickerResponse>, ExchangeError> = self
            .rest
            .get_json("/api/v1/ticker", &[("symbol", symbol)])
            .await;
        match ticker {
            Ok(Some(t)) if t.code == OK_CODE => t
                .data
                .and_then(|d| d.price)
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0),
            Ok(_) => 0.0,
            Err(e) => {
                debug!("kucoin ticker failed for {}: {}", symbol, e);
                0.0
            }
        }
    }
}

#[async_trait]
impl Exchange for KucoinClient {
    fn name(&self) -> &str {
        self.rest.exchange()
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        vec![format!("{}USDTM", token), format!("{}USDT", token)]
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol
            .trim_end_matches("USDTM")
            .trim_end_matches("USDT")
            .to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        let response: ActiveContracts = self
            .rest
            .get_json_required("/api/v1/contracts/active", &[])
            .await?;
        if response.code != OK_CODE {
            return Err(ExchangeError::unavailable(
                self.name(),
                format!("contracts request returned code {}", response.code),
            ));
        }

        let contracts = response
            .data
            .into_iter()
            .filter(|c| c.symbol.contains("USDT"))
            .take(limit)
            .map(|c| ContractInfo {
                exchange: self.name().to_string(),
                base_currency: c.base_currency,
                symbol: c.symbol,
                quote_currency: "USDT".to_string(),
            })
            .collect();
        Ok(contracts)
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        let path = format!("/api/v1/funding-rate/{}/current", symbol);
        let response: Option<FundingCurrent> = self.rest.get_json(&path, &[]).await?;

        let rate = match response {
            Some(r) if r.code == OK_CODE => match r.data.and_then(|d| d.value) {
                Some(value) => value,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let mark_price = self.last_price(symbol).await;
        Ok(Some(FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol: symbol.to_string(),
            rate,
            mark_price,
            next_funding_time: next_funding_boundary(Utc::now()),
            quote_currency: "USDT".to_string(),
        }))
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        let contracts = self.list_top_contracts(50).await?;
        let rates = self.rates_for_contracts(&contracts).await;
        debug!("Fetched {} funding rates from kucoin", rates.len());
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> KucoinClient {
        KucoinClient::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_funding_current_parsing() {
        let raw = r#"{
            "code": "200000",
            "data": {
                "symbol": ".XBTUSDTMFPI8H",
                "granularity": 28800000,
                "timePoint": 1700179200000,
                "value": 0.000076,
                "predictedValue": 0.00008
            }
        }"#;
        let response: FundingCurrent = serde_json::from_str(raw).unwrap();
        assert_eq!(response.code, OK_CODE);
        assert!((response.data.unwrap().value.unwrap() - 0.000076).abs() < 1e-12);
    }

    #[test]
    fn test_contract_listing_keeps_usdt_margined() {
        let raw = r#"{
            "code": "200000",
            "data": [
                {"symbol": "XBTUSDTM", "baseCurrency": "XBT"},
                {"symbol": "ETHUSDM", "baseCurrency": "ETH"},
                {"symbol": "SOLUSDTM", "baseCurrency": "SOL"}
            ]
        }"#;
        let response: ActiveContracts = serde_json::from_str(raw).unwrap();
        let usdt: Vec<_> = response
            .data
            .into_iter()
            .filter(|c| c.symbol.contains("USDT"))
            .collect();
        assert_eq!(usdt.len(), 2);
    }

    #[test]
    fn test_symbol_mapping() {
        let client = test_client();
        assert_eq!(client.symbol_variants("BTC"), vec!["BTCUSDTM", "BTCUSDT"]);
        assert_eq!(client.canonical_token("SOLUSDTM"), "SOL");
        assert_eq!(client.canonical_token("SOLUSDT"), "SOL");
    }
}
