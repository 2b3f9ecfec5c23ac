use std::cmp::Ordering;

use tracing::{debug, info};

use crate::types::{HedgingOpportunity, TokenGroup};

/// Finds delta-neutral funding captures inside a token group: long the venue
/// paying the lowest rate, short the venue paying the highest.
pub struct SpreadDetector {
    min_spread_pct: f64,
}

impl SpreadDetector {
    pub fn new(min_spread_pct: f64) -> Self {
        Self { min_spread_pct }
    }

    pub fn min_spread_pct(&self) -> f64 {
        self.min_spread_pct
    }

    pub fn detect(&self, group: &TokenGroup) -> Option<HedgingOpportunity> {
        if group.exchange_count() < 2 {
            debug!("Only one venue quotes {}, nothing to hedge", group.token);
            return None;
        }

        let long = group
            .rates
            .iter()
            .min_by(|a, b| a.rate.partial_cmp(&b.rate).unwrap_or(Ordering::Equal))?;
        let short = group
            .rates
            .iter()
            .max_by(|a, b| a.rate.partial_cmp(&b.rate).unwrap_or(Ordering::Equal))?;

        let spread_pct = (short.rate - long.rate) * 100.0;
        if spread_pct < self.min_spread_pct {
            debug!(
                "Spread on {} is {:.4}%, below the {:.2}% threshold",
                group.token, spread_pct, self.min_spread_pct
            );
            return None;
        }

        debug!(
            "Hedge candidate on {}: long {} at {:.4}%, short {} at {:.4}%",
            group.token,
            long.exchange,
            long.rate_percentage(),
            short.exchange,
            short.rate_percentage()
        );
        Some(HedgingOpportunity::new(group.token.clone(), long, short))
    }

    pub fn detect_all<'a, I>(&self, groups: I) -> Vec<HedgingOpportunity>
    where
        I: IntoIterator<Item = &'a TokenGroup>,
    {
        let mut opportunities: Vec<HedgingOpportunity> = groups
            .into_iter()
            .filter_map(|group| self.detect(group))
            .collect();

        opportunities.sort_by(|a, b| {
            b.spread_pct
                .partial_cmp(&a.spread_pct)
                .unwrap_or(Ordering::Equal)
        });

        if !opportunities.is_empty() {
            info!("Found {} hedging opportunities", opportunities.len());
        }
        opportunities
    }
}
