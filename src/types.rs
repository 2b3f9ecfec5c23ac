use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    pub exchange: String,
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub exchange: String,
    pub symbol: String,
    /// Signed fraction, e.g. 0.0005 means 0.05% per funding interval.
    pub rate: f64,
    pub mark_price: f64,
    pub next_funding_time: DateTime<Utc>,
    pub quote_currency: String,
}

impl FundingRate {
    pub fn rate_percentage(&self) -> f64 {
        self.rate * 100.0
    }

    pub fn abs_rate(&self) -> f64 {
        self.rate.abs()
    }
}

/// All rates collected for one canonical token, at most one per exchange,
/// ordered by absolute rate descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGroup {
    pub token: String,
    pub rates: Vec<FundingRate>,
}

impl TokenGroup {
    pub fn top_rate(&self) -> Option<&FundingRate> {
        self.rates.first()
    }

    /// Soonest settlement among the contributing exchanges.
    pub fn next_settlement(&self) -> Option<DateTime<Utc>> {
        self.rates.iter().map(|r| r.next_funding_time).min()
    }

    pub fn exchange_count(&self) -> usize {
        self.rates.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgingOpportunity {
    pub id: Uuid,
    pub token: String,
    pub long_exchange: String,
    pub short_exchange: String,
    pub long_rate: f64,
    pub short_rate: f64,
    /// Rate difference in percentage points: (short_rate - long_rate) * 100.
    pub spread_pct: f64,
    pub reference_price: f64,
    pub next_funding_time: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl HedgingOpportunity {
    pub fn new(token: String, long: &FundingRate, short: &FundingRate) -> Self {
        let spread_pct = (short.rate - long.rate) * 100.0;

        Self {
            id: Uuid::new_v4(),
            token,
            long_exchange: long.exchange.clone(),
            short_exchange: short.exchange.clone(),
            long_rate: long.rate,
            short_rate: short.rate,
            spread_pct,
            reference_price: long.mark_price,
            next_funding_time: long.next_funding_time.min(short.next_funding_time),
            detected_at: Utc::now(),
        }
    }
}

/// Outcome of one exchange within a fetch cycle, kept alongside the grouped
/// data so consumers can tell which venues contributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub exchange: String,
    pub ok: bool,
    pub rates: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesSnapshot {
    pub groups: HashMap<String, TokenGroup>,
    pub sources: Vec<SourceOutcome>,
    pub fetched_at: DateTime<Utc>,
}

impl RatesSnapshot {
    pub fn contributing_exchanges(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.ok)
            .map(|s| s.exchange.clone())
            .collect()
    }
}
