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

const BASE_URL: &str = "https://api.bitget.com";
const OK_CODE: &str = "00000";

pub struct BitgetClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct ContractsResponse {
    code: String,
    #[serde(default)]
    data: Vec<BitgetContract>,
}

#[derive(Debug, Deserialize)]
struct BitgetContract {
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct FundRateResponse {
    code: String,
    #[serde(default)]
    data: Option<FundRateData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundRateData {
    #[serde(default)]
    funding_rate: Option<String>,
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
    last: Option<String>,
}

impl BitgetClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("bitget", BASE_URL, timeout)?,
        })
    }

    async fn mark_price(&self, symbol: &str) -> f64 {
        let ticker: Result<Option<TickerResponse>, ExchangeError> = self
            .rest
            .get_json("/api/mix/v1/market/ticker", &[("symbol", symbol)])
            .await;
        match ticker {
            Ok(Some(t)) if t.code == OK_CODE => t
                .data
                .and_then(|d| d.last)
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[async_trait]
impl Exchange for BitgetClient {
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
        let response: ContractsResponse = self
            .rest
            .get_json_required("/api/mix/v1/market/contracts", &[("productType", "umcbl")])
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
            .filter(|c| c.symbol.ends_with("USDT"))
            .take(limit)
            .map(|c| ContractInfo {
                exchange: self.name().to_string(),
                base_currency: c.symbol.trim_end_matches("USDT").to_string(),
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
        let response: Option<FundRateResponse> = self
            .rest
            .get_json("/api/mix/v1/market/current-fundRate", &[("symbol", symbol)])
            .await?;

        let rate = match response {
            Some(r) if r.code == OK_CODE => match r
                .data
                .and_then(|d| d.funding_rate)
                .and_then(|v| v.parse::<f64>().ok())
            {
                Some(rate) => rate,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let mark_price = self.mark_price(symbol).await;
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
        let contracts = self.list_top_contracts(30).await?;

        // Bitget rate-limits bursty clients, so walk the list one by one.
        let mut rates = Vec::new();
        for contract in &contracts {
            match self.fetch_funding_rate(&contract.symbol).await {
                Ok(Some(rate)) => rates.push(rate),
                Ok(None) => {}
                Err(e) => debug!("bitget: no data for {}: {}", contract.symbol, e),
            }
        }
        debug!("Fetched {} funding rates from bitget", rates.len());
        Ok(rates)
    }
}
