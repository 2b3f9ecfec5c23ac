use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::http::{settlement_from_millis, RestClient};
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

const BASE_URL: &str = "https://api.bybit.com";

pub struct BybitClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickersResponse {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<TickersResult>,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    #[serde(default)]
    list: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    symbol: String,
    #[serde(default)]
    funding_rate: String,
    #[serde(default)]
    next_funding_time: String,
    #[serde(default)]
    last_price: String,
}

impl BybitClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("bybit", BASE_URL, timeout)?,
        })
    }

    async fn tickers(&self, symbol: Option<&str>) -> Result<TickersResponse, ExchangeError> {
        let mut query = vec![("category", "linear")];
        if let Some(symbol) = symbol {
            query.push(("symbol", symbol));
        }
        self.rest.get_json_required("/v5/market/tickers", &query).await
    }

    fn rate_from_ticker(&self, ticker: Ticker) -> Option<FundingRate> {
        let rate = ticker.funding_rate.parse::<f64>().ok()?;
        let next_ms = ticker.next_funding_time.parse::<i64>().ok()?;
        let next_funding_time = settlement_from_millis(next_ms)?;
        let mark_price = ticker.last_price.parse::<f64>().unwrap_or(0.0);

        Some(FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol: ticker.symbol,
            rate,
            mark_price,
            next_funding_time,
            quote_currency: "USDT".to_string(),
        })
    }
}

#[async_trait]
impl Exchange for BybitClient {
    fn name(&self) -> &str {
        self.rest.exchange()
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        vec![format!("{}USDT", token), format!("{}PERP", token)]
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol
            .trim_end_matches("USDT")
            .trim_end_matches("PERP")
            .to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        let response = self.tickers(None).await?;
        if response.ret_code != 0 {
            return Err(ExchangeError::unavailable(
                self.name(),
                format!("retCode {}: {}", response.ret_code, response.ret_msg),
            ));
        }

        let contracts = response
            .result
            .map(|r| r.list)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT"))
            .take(limit)
            .map(|t| ContractInfo {
                exchange: self.name().to_string(),
                base_currency: t.symbol.trim_end_matches("USDT").to_string(),
                symbol: t.symbol,
                quote_currency: "USDT".to_string(),
            })
            .collect();
        Ok(contracts)
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        let response = self.tickers(Some(symbol)).await?;
        if response.ret_code != 0 {
            // Bybit answers an unknown symbol with a non-zero retCode.
            return Ok(None);
        }
        let ticker = match response.result.map(|r| r.list).unwrap_or_default().pop() {
            Some(ticker) => ticker,
            None => return Ok(None),
        };
        Ok(self.rate_from_ticker(ticker))
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        let response = self.tickers(None).await?;
        if response.ret_code != 0 {
            return Err(ExchangeError::unavailable(
                self.name(),
                format!("retCode {}: {}", response.ret_code, response.ret_msg),
            ));
        }

        let rates: Vec<FundingRate> = response
            .result
            .map(|r| r.list)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT"))
            .filter_map(|t| self.rate_from_ticker(t))
            .collect();
        debug!("Fetched {} funding rates from bybit", rates.len());
        Ok(rates)
    }
}
