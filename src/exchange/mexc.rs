use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ExchangeError;
use crate::exchange::http::{next_funding_boundary, RestClient};
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

const BASE_URL: &str = "https://contract.mexc.com";

pub struct MexcClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct ContractDetail {
    success: bool,
    #[serde(default)]
    data: Vec<ContractEntry>,
}

#[derive(Debug, Deserialize)]
struct ContractEntry {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    success: bool,
    #[serde(default)]
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    #[serde(default)]
    funding_rate: Option<f64>,
    #[serde(default)]
    last_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FundingResponse {
    success: bool,
    #[serde(default)]
    data: Option<FundingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingData {
    #[serde(default)]
    funding_rate: Option<f64>,
}

impl MexcClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("mexc", BASE_URL, timeout)?,
        })
    }

    /// MEXC spells perpetuals as BTC_USDT; accept the plain form too.
    fn native_symbol(symbol: &str) -> String {
        if symbol.contains("USDT") && !symbol.contains('_') {
            symbol.replace("USDT", "_USDT")
        } else {
            symbol.to_string()
        }
    }

    fn rate(&self, symbol: String, rate: f64, mark_price: f64) -> FundingRate {
        FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol,
            rate,
            mark_price,
            next_funding_time: next_funding_boundary(Utc::now()),
            quote_currency: "USDT".to_string(),
        }
    }
}

#[async_trait]
impl Exchange for MexcClient {
    fn name(&self) -> &str {
        self.rest.exchange()
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        vec![format!("{}_USDT", token)]
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol.trim_end_matches("_USDT").to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        let detail: ContractDetail = self
            .rest
            .get_json_required("/api/v1/contract/detail", &[])
            .await?;
        if !detail.success {
            return Err(ExchangeError::unavailable(
                self.name(),
                "contract detail request was not successful",
            ));
        }

        let contracts = detail
            .data
            .into_iter()
            .filter(|c| c.symbol.contains("_USDT"))
            .take(limit)
            .map(|c| ContractInfo {
                exchange: self.name().to_string(),
                base_currency: c.symbol.trim_end_matches("_USDT").to_string(),
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
        let native = Self::native_symbol(symbol);

        let ticker_path = format!("/api/v1/contract/ticker/{}", native);
        let ticker: Option<TickerResponse> = self.rest.get_json(&ticker_path, &[]).await?;
        if let Some(TickerResponse {
            success: true,
            data: Some(data),
        }) = ticker
        {
            if let Some(rate) = data.funding_rate {
                let price = data.last_price.unwrap_or(0.0);
                return Ok(Some(self.rate(native, rate, price)));
            }
        }

        // The ticker omits funding for some instruments; the dedicated
        // funding endpoint still knows them, but carries no price.
        let funding_path = format!("/api/v1/contract/funding_rate/{}", native);
        let funding: Option<FundingResponse> = self.rest.get_json(&funding_path, &[]).await?;
        match funding {
            Some(FundingResponse {
                success: true,
                data: Some(data),
            }) => match data.funding_rate {
                Some(rate) => Ok(Some(self.rate(native, rate, 0.0))),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        let contracts = self.list_top_contracts(100).await?;
        if contracts.is_empty() {
            warn!("No contracts found on mexc");
            return Ok(Vec::new());
        }

        let probed = contracts.len().min(30);
        let rates = self.rates_for_contracts(&contracts[..probed]).await;
        info!(
            "mexc: got {} funding rates from {} contracts",
            rates.len(),
            contracts.len()
        );
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> MexcClient {
        MexcClient::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_native_symbol_conversion() {
        assert_eq!(MexcClient::native_symbol("BTCUSDT"), "BTC_USDT");
        assert_eq!(MexcClient::native_symbol("BTC_USDT"), "BTC_USDT");
        assert_eq!(MexcClient::native_symbol("ETHBTC"), "ETHBTC");
    }

    #[test]
    fn test_ticker_parsing() {
        let raw = r#"{
            "success": true,
            "code": 0,
            "data": {
                "symbol": "BTC_USDT",
                "lastPrice": 43251.5,
                "fundingRate": 0.000095,
                "riseFallRate": 0.0123
            }
        }"#;
        let response: TickerResponse = serde_json::from_str(raw).unwrap();
        assert!(response.success);
        let data = response.data.unwrap();
        assert!((data.funding_rate.unwrap() - 0.000095).abs() < 1e-12);
        assert!((data.last_price.unwrap() - 43251.5).abs() < 1e-9);
    }

    #[test]
    fn test_rate_settlement_is_in_the_future() {
        let rate = test_client().rate("BTC_USDT".to_string(), 0.0001, 43000.0);
        assert!(rate.next_funding_time > Utc::now());
        assert_eq!(rate.quote_currency, "USDT");
    }

    #[test]
    fn test_symbol_mapping() {
        let client = test_client();
        assert_eq!(client.symbol_variants("BTC"), vec!["BTC_USDT"]);
        assert_eq!(client.canonical_token("SOL_USDT"), "SOL");
    }
}
