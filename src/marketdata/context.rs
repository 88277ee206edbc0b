//! Per-iteration instrument cache.
//!
//! Built once by the iteration driver before the first resolver call and
//! dropped when the iteration ends, so every iteration sees fresh listings.

use anyhow::Result;
use tracing::debug;

use crate::broker::Broker;
use crate::models::{canonical_ticker, Instrument};

/// Instrument listings for one iteration.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    etfs: Vec<Instrument>,
    currencies: Vec<Instrument>,
}

impl MarketContext {
    /// Fetch the listings the iteration will work against.
    pub async fn build<B: Broker>(broker: &B) -> Result<Self> {
        let etfs = broker.list_etfs().await?;
        let currencies = broker.list_currencies().await?;

        debug!(
            etfs = etfs.len(),
            currencies = currencies.len(),
            "market context built"
        );

        Ok(Self { etfs, currencies })
    }

    #[cfg(test)]
    pub fn from_listings(etfs: Vec<Instrument>, currencies: Vec<Instrument>) -> Self {
        Self { etfs, currencies }
    }

    /// Find an ETF by ticker, applying alias normalization to both sides.
    pub fn find_etf(&self, ticker: &str) -> Option<&Instrument> {
        let wanted = canonical_ticker(ticker);
        self.etfs
            .iter()
            .find(|i| canonical_ticker(&i.ticker) == wanted)
    }

    /// Find the instrument a FIGI or UID belongs to.
    pub fn find_by_id(&self, id: &str) -> Option<&Instrument> {
        self.etfs
            .iter()
            .chain(self.currencies.iter())
            .find(|i| i.figi == id || i.uid == id)
    }

    /// Find the currency instrument for an ISO code (e.g. "usd").
    pub fn find_currency(&self, iso_code: &str) -> Option<&Instrument> {
        let wanted = iso_code.to_lowercase();
        self.currencies
            .iter()
            .find(|i| i.iso_currency.as_deref() == Some(wanted.as_str()))
    }
}
