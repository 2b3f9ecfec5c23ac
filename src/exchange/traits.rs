use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::error::ExchangeError;
use crate::types::{ContractInfo, FundingRate};

#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Native symbol spellings this venue is probed with for a canonical
    /// token, most likely spelling first.
    fn symbol_variants(&self, token: &str) -> Vec<String>;

    /// Canonical base token for one of this venue's native symbols.
    fn canonical_token(&self, symbol: &str) -> String;

    async fn list_top_contracts(&self, limit: usize) -> Result<Vec<ContractInfo>, ExchangeError>;

    /// Probes exactly one native symbol. `Ok(None)` means the instrument is
    /// not listed here, which is an expected outcome, not a failure.
    async fn fetch_funding_rate(&self, symbol: &str)
        -> Result<Option<FundingRate>, ExchangeError>;

    async fn get_all_funding_rates(&self) -> Result<Vec<FundingRate>, ExchangeError>;

    /// Resolves a canonical token against this venue's naming by walking the
    /// variants in order, stopping at the first listed one. A transport
    /// failure aborts the walk; exhausting all variants is a plain `Ok(None)`.
    async fn funding_rate(&self, token: &str) -> Result<Option<FundingRate>, ExchangeError> {
        for variant in self.symbol_variants(token) {
            if let Some(rate) = self.fetch_funding_rate(&variant).await? {
                debug!("Resolved {} on {} as {}", token, self.name(), variant);
                return Ok(Some(rate));
            }
        }
        debug!("{} is not listed on {}", token, self.name());
        Ok(None)
    }

    /// Reachability probe. A venue that answers with an empty listing, as
    /// some do during maintenance, does not count as available.
    async fn is_available(&self) -> bool {
        self.list_top_contracts(1)
            .await
            .map(|contracts| !contracts.is_empty())
            .unwrap_or(false)
    }

    /// Per-symbol fallback for venues without a bulk funding endpoint.
    /// Unlisted and malformed instruments are skipped.
    async fn rates_for_contracts(&self, contracts: &[ContractInfo]) -> Vec<FundingRate> {
        let probes = contracts
            .iter()
            .map(|contract| self.fetch_funding_rate(&contract.symbol));
        join_all(probes)
            .await
            .into_iter()
            .filter_map(|result| result.ok().flatten())
            .collect()
    }
}
