//! Instrument model and ticker normalization.

use serde::{Deserialize, Serialize};

/// A tradable instrument as known to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange ticker (canonical form)
    pub ticker: String,

    /// Broker-assigned FIGI
    pub figi: String,

    /// Broker-assigned instrument UID
    pub uid: String,

    /// UID of the underlying asset record, when the broker exposes one
    #[serde(default)]
    pub asset_uid: Option<String>,

    /// Minimum tradable quantity (shares per lot), always >= 1
    pub lot: u64,

    /// ISO currency code the instrument trades in (lowercase)
    pub currency: String,

    /// For currency instruments: the ISO code of the currency itself
    #[serde(default)]
    pub iso_currency: Option<String>,

    /// Outstanding shares as reported on the instrument listing, if any
    #[serde(default)]
    pub num_shares: Option<f64>,
}

impl Instrument {
    /// Lot size guarded against broker responses that report zero.
    pub fn lot_size(&self) -> u64 {
        self.lot.max(1)
    }
}

/// Map legacy tickers to their current listing.
///
/// Brokers keep positions under the ticker that was current at purchase
/// time, so a re-listed instrument shows up under both names.
pub fn canonical_ticker(ticker: &str) -> &str {
    match ticker {
        "TCS" | "TCSG" => "T",
        other => other,
    }
}
