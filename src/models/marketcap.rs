//! Market capitalization and AUM data resolved per instrument.

use serde::{Deserialize, Serialize};

/// Which fallback tier supplied the outstanding-shares figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumSharesSource {
    /// Present on the instrument listing itself
    Listing,
    /// Secondary instrument-by-uid lookup
    EtfBy,
    /// Asset metadata lookup
    Asset,
}

/// Resolved market-cap data for one instrument.
///
/// An instrument with zero outstanding shares has a market cap of `0`;
/// "unknown" is expressed by the instrument being absent from the result
/// map, never by a zero value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCapInfo {
    pub ticker: String,

    /// Outstanding shares, converted from the broker's units+nano pair
    pub num_shares: f64,

    /// Provenance of `num_shares`
    pub num_shares_source: NumSharesSource,

    /// Last price converted to the home currency
    pub last_price: f64,

    /// `num_shares * last_price`, in the home currency
    pub market_cap: f64,
}

impl MarketCapInfo {
    pub fn new(
        ticker: String,
        num_shares: f64,
        num_shares_source: NumSharesSource,
        last_price: f64,
    ) -> Self {
        Self {
            ticker,
            num_shares,
            num_shares_source,
            last_price,
            market_cap: num_shares * last_price,
        }
    }
}

/// Assets under management for a fund, converted to the home currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AumInfo {
    /// AUM in the home currency
    pub amount: f64,

    /// Currency the provider reported the figure in
    pub currency: String,
}
