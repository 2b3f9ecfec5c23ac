use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::ExchangeError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Thin wrapper around one venue's REST endpoint: shared client, base URL,
/// and the mapping from HTTP outcomes into the adapter error taxonomy.
pub struct RestClient {
    exchange: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(exchange: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client for {}: {}", exchange, e))?;

        Ok(Self {
            exchange: exchange.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// GET a JSON document. `Ok(None)` is returned for 400/404 responses so
    /// per-symbol probes can report "not listed"; every other non-success
    /// status is an upstream failure.
    pub async fn get_json<T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ExchangeError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ExchangeError::unavailable(
                &self.exchange,
                format!("HTTP {} from {}", status.as_u16(), path),
            ));
        }

        let payload = response.json::<T>().await.map_err(|e| {
            ExchangeError::unavailable(&self.exchange, format!("bad payload from {}: {}", path, e))
        })?;
        Ok(Some(payload))
    }

    /// Same as `get_json` for endpoints where "not listed" makes no sense
    /// (contract listings, bulk tickers).
    pub async fn get_json_required<T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ExchangeError>
    where
        T: DeserializeOwned,
    {
        match self.get_json(path, query).await? {
            Some(payload) => Ok(payload),
            None => Err(ExchangeError::unavailable(
                &self.exchange,
                format!("{} rejected the request", path),
            )),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::timeout(&self.exchange, self.timeout.as_millis() as u64)
        } else {
            ExchangeError::unavailable(&self.exchange, err)
        }
    }
}

/// Millisecond epoch settlement time as reported by most venues. Zero or
/// negative values mean the venue had nothing scheduled.
pub fn settlement_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(ms)
}

/// Next 00/08/16 UTC funding boundary, for venues that do not report their
/// own settlement time.
pub fn next_funding_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let step = chrono::Duration::hours(8).num_seconds();
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now + chrono::Duration::hours(8))
}
