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

const BASE_URL: &str = "https://api-cloud.bitmart.com";
const OK_CODE: i64 = 1000;

pub struct BitmartClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    code: i64,
    #[serde(default)]
    data: Option<DetailsData>,
}

#[derive(Debug, Deserialize)]
struct DetailsData {
    #[serde(default)]
    symbols: Vec<BitmartContract>,
}

#[derive(Debug, Deserialize)]
struct BitmartContract {
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct FundingResponse {
    code: i64,
    #[serde(default)]
    data: Option<FundingData>,
}

#[derive(Debug, Deserialize)]
struct FundingData {
    #[serde(default)]
    rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    code: i64,
    #[serde(default)]
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(default)]
    tickers: Vec<BitmartTicker>,
}

#[derive(Debug, Deserialize)]
struct BitmartTicker {
    #[serde(default)]
    last_price: Option<String>,
}

impl BitmartClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("bitmart", BASE_URL, timeout)?,
        })
    }

    fn contracts_from_details(
        &self,
        symbols: Vec<BitmartContract>,
        limit: usize,
    ) -> Vec<ContractInfo> {
        symbols
            .into_iter()
            .filter(|c| c.symbol.ends_with("USDT"))
            .take(limit)
            .map(|c| ContractInfo {
                exchange: self.rest.exchange().to_string(),
                base_currency: c.symbol.trim_end_matches("USDT").to_string(),
                symbol: c.symbol,
                quote_currency: "USDT".to_string(),
            })
            .collect()
    }

    async fn mark_price(&self, symbol: &str) -> f64 {
        let ticker: Result<Option<TickerResponse>, ExchangeError> = self
            .rest
            .get_json("/contract/public/ticker", &[("symbol", symbol)])
            .await;
        match ticker {
            Ok(Some(t)) if t.code == OK_CODE => t
                .data
                .and_then(|d| d.tickers.into_iter().next())
                .and_then(|t| t.last_price)
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[async_trait]
impl Exchange for BitmartClient {
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
        let response: DetailsResponse = self
            .rest
            .get_json_required("/contract/public/details", &[])
            .await?;
        if response.code != OK_CODE {
            return Err(ExchangeError::unavailable(
                self.name(),
                format!("contract details returned code {}", response.code),
            ));
        }

        let symbols = response.data.map(|d| d.symbols).unwrap_or_default();
        Ok(self.contracts_from_details(symbols, limit))
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        let response: Option<FundingResponse> = self
            .rest
            .get_json("/contract/public/funding-rate", &[("symbol", symbol)])
            .await?;

        let rate = match response {
            Some(r) if r.code == OK_CODE => match r
                .data
                .and_then(|d| d.rate)
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
            // BitMart settles on the 00/08/16 UTC grid and the endpoint
            // does not report the timestamp.
            next_funding_time: next_funding_boundary(Utc::now()),
            quote_currency: "USDT".to_string(),
        }))
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        let contracts = self.list_top_contracts(30).await?;

        let mut rates = Vec::new();
        for contract in &contracts {
            match self.fetch_funding_rate(&contract.symbol).await {
                Ok(Some(rate)) => rates.push(rate),
                Ok(None) => {}
                Err(e) => debug!("bitmart: no data for {}: {}", contract.symbol, e),
            }
        }
        debug!("Fetched {} funding rates from bitmart", rates.len());
        Ok(rates)
    }
}
