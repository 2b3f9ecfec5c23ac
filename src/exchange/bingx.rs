use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::http::{next_funding_boundary, settlement_from_millis, RestClient};
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

const BASE_URL: &str = "https://open-api.bingx.com";

pub struct BingxClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct ContractsResponse {
    code: i64,
    #[serde(default)]
    data: Vec<BingxContract>,
}

#[derive(Debug, Deserialize)]
struct BingxContract {
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    code: i64,
    #[serde(default)]
    data: Option<PremiumIndex>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    #[serde(default)]
    last_funding_rate: Option<String>,
    #[serde(default)]
    next_funding_time: i64,
    #[serde(default)]
    mark_price: Option<String>,
}

impl BingxClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("bingx", BASE_URL, timeout)?,
        })
    }

    fn contracts_from_listing(
        &self,
        listing: Vec<BingxContract>,
        limit: usize,
    ) -> Vec<ContractInfo> {
        listing
            .into_iter()
            .filter(|c| c.symbol.ends_with("-USDT"))
            .take(limit)
            .map(|c| ContractInfo {
                exchange: self.rest.exchange().to_string(),
                base_currency: c.symbol.trim_end_matches("-USDT").to_string(),
                symbol: c.symbol,
                quote_currency: "USDT".to_string(),
            })
            .collect()
    }

    fn rate_from_index(&self, symbol: &str, index: PremiumIndex) -> Option<FundingRate> {
        let rate = index.last_funding_rate.as_deref()?.parse::<f64>().ok()?;
        let mark_price = index
            .mark_price
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);
        // BingX reports 0 here for some instruments; fall back to the 8h grid.
        let next_funding_time = settlement_from_millis(index.next_funding_time)
            .unwrap_or_else(|| next_funding_boundary(Utc::now()));
        Some(FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol: symbol.to_string(),
            rate,
            mark_price,
            next_funding_time,
            quote_currency: "USDT".to_string(),
        })
    }
}

#[async_trait]
impl Exchange for BingxClient {
    fn name(&self) -> &str {
        self.rest.exchange()
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        vec![format!("{}-USDT", token)]
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol.trim_end_matches("-USDT").to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        let response: ContractsResponse = self
            .rest
            .get_json_required("/openApi/swap/v2/quote/contracts", &[])
            .await?;
        if response.code != 0 {
            return Err(ExchangeError::unavailable(
                self.name(),
                format!("contracts request returned code {}", response.code),
            ));
        }

        Ok(self.contracts_from_listing(response.data, limit))
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        let response: Option<PremiumIndexResponse> = self
            .rest
            .get_json("/openApi/swap/v2/quote/premiumIndex", &[("symbol", symbol)])
            .await?;

        match response {
            Some(r) if r.code == 0 => match r.data {
                Some(index) => Ok(self.rate_from_index(symbol, index)),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        let contracts = self.list_top_contracts(30).await?;

        let mut rates = Vec::new();
        for contract in &contracts {
            match self.fetch_funding_rate(&contract.symbol).await {
                Ok(Some(rate)) => rates.push(rate),
                Ok(None) => {}
                Err(e) => debug!("bingx: no data for {}: {}", contract.symbol, e),
            }
        }
        debug!("Fetched {} funding rates from bingx", rates.len());
        Ok(rates)
    }
}
