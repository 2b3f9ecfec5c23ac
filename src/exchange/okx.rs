use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::http::{settlement_from_millis, RestClient};
use crate::exchange::traits::Exchange;
use crate::types::{ContractInfo, FundingRate};

const BASE_URL: &str = "https://www.okx.com";
const OK_CODE: &str = "0";

pub struct OkxClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    code: String,
    #[serde(default)]
    data: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    #[serde(default)]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct FundingResponse {
    code: String,
    #[serde(default)]
    data: Vec<FundingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    #[serde(default)]
    funding_rate: Option<String>,
    #[serde(default)]
    next_funding_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarkPriceResponse {
    code: String,
    #[serde(default)]
    data: Vec<MarkPriceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkPriceEntry {
    #[serde(default)]
    mark_px: Option<String>,
}

impl OkxClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("okx", BASE_URL, timeout)?,
        })
    }

    fn contracts_from_instruments(
        &self,
        instruments: Vec<Instrument>,
        limit: usize,
    ) -> Vec<ContractInfo> {
        instruments
            .into_iter()
            .filter(|i| i.inst_id.ends_with("-USDT-SWAP"))
            .take(limit)
            .map(|i| ContractInfo {
                exchange: self.rest.exchange().to_string(),
                base_currency: i.inst_id.trim_end_matches("-USDT-SWAP").to_string(),
                symbol: i.inst_id,
                quote_currency: "USDT".to_string(),
            })
            .collect()
    }

    async fn mark_price(&self, inst_id: &str) -> f64 {
        let response: Result<Option<MarkPriceResponse>, ExchangeError> = self
            .rest
            .get_json(
                "/api/v5/market/mark-price",
                &[("instId", inst_id), ("instType", "SWAP")],
            )
            .await;
        match response {
            Ok(Some(r)) if r.code == OK_CODE => r
                .data
                .into_iter()
                .next()
                .and_then(|e| e.mark_px)
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[async_trait]
impl Exchange for OkxClient {
    fn name(&self) -> &str {
        self.rest.exchange()
    }

    fn symbol_variants(&self, token: &str) -> Vec<String> {
        vec![format!("{}-USDT-SWAP", token)]
    }

    fn canonical_token(&self, symbol: &str) -> String {
        symbol.trim_end_matches("-USDT-SWAP").to_string()
    }

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError> {
        let response: InstrumentsResponse = self
            .rest
            .get_json_required("/api/v5/public/instruments", &[("instType", "SWAP")])
            .await?;
        if response.code != OK_CODE {
            return Err(ExchangeError::unavailable(
                self.name(),
                format!("instruments request returned code {}", response.code),
            ));
        }

        Ok(self.contracts_from_instruments(response.data, limit))
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &str,
    ) -> Result<Option<FundingRate>, ExchangeError> {
        let response: Option<FundingResponse> = self
            .rest
            .get_json("/api/v5/public/funding-rate", &[("instId", symbol)])
            .await?;

        let entry = match response {
            Some(r) if r.code == OK_CODE => match r.data.into_iter().next() {
                Some(entry) => entry,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let rate = match entry.funding_rate.as_deref().and_then(|v| v.parse::<f64>().ok()) {
            Some(rate) => rate,
            None => return Ok(None),
        };
        let millis = entry
            .next_funding_time
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next_funding_time = match settlement_from_millis(millis) {
            Some(ts) => ts,
            None => return Ok(None),
        };

        let mark_price = self.mark_price(symbol).await;
        Ok(Some(FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol: symbol.to_string(),
            rate,
            mark_price,
            next_funding_time,
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
                Err(e) => debug!("okx: no data for {}: {}", contract.symbol, e),
            }
        }
        debug!("Fetched {} funding rates from okx", rates.len());
        Ok(rates)
    }
}
