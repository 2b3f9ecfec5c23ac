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

const BASE_URL: &str = "https://api.gateio.ws/api/v4";

pub struct GateioClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
struct Contract {
    name: String,
    #[serde(default)]
    in_delisting: bool,
    #[serde(default)]
    funding_rate: Option<String>,
    #[serde(default)]
    mark_price: Option<String>,
}

impl GateioClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new("gate", BASE_URL, timeout)?,
        })
    }

    /// Gate.io spells perpetuals as BTC_USDT; accept the plain form too.
    fn native_symbol(symbol: &str) -> String {
        if symbol.contains("USDT") && !symbol.contains('_') {
            symbol.replace("USDT", "_USDT")
        } else {
            symbol.to_string()
        }
    }

    fn rate_from_contract(&self, contract: Contract) -> Option<FundingRate> {
        let rate = contract.funding_rate.as_deref()?.parse::<f64>().ok()?;
        let mark_price = contract
            .mark_price
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);

        Some(FundingRate {
            exchange: self.rest.exchange().to_string(),
            symbol: contract.name,
            rate,
            mark_price,
            next_funding_time: next_funding_boundary(Utc::now()),
            quote_currency: "USDT".to_string(),
        })
    }
}

#[async_trait]
impl Exchange for GateioClient {
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
        let contracts: Vec<Contract> = self
            .rest
            .get_json_required("/futures/usdt/contracts", &[])
            .await?;

        let contracts = contracts
            .into_iter()
            .filter(|c| !c.in_delisting && c.name.contains("_USDT"))
            .take(limit)
            .map(|c| ContractInfo {
                exchange: self.name().to_string(),
                base_currency: c.name.trim_end_matches("_USDT").to_string(),
                symbol: c.name,
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
        let path = format!("/futures/usdt/contracts/{}", native);
        let contract: Option<Contract> = self.rest.get_json(&path, &[]).await?;
        Ok(contract.and_then(|c| self.rate_from_contract(c)))
    }

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError> {
        // The contract listing already carries funding_rate and mark_price,
        // so one request covers the whole venue.
        let contracts: Vec<Contract> = self
            .rest
            .get_json_required("/futures/usdt/contracts", &[])
            .await?;

        let rates: Vec<FundingRate> = contracts
            .into_iter()
            .filter(|c| !c.in_delisting && c.name.contains("_USDT"))
            .filter_map(|c| self.rate_from_contract(c))
            .collect();
        debug!("Fetched {} funding rates from gate", rates.len());
        Ok(rates)
    }
}
