//! Portfolio position: current vs. desired state for one instrument.

use serde::{Deserialize, Serialize};

/// One row of the rebalancing table, recomputed fresh every iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    /// Canonical ticker
    pub ticker: String,

    /// FIGI, if the instrument was resolvable in this iteration
    pub figi: Option<String>,

    /// Shares per lot
    pub lot: u64,

    /// Price of one lot in the home currency
    pub lot_price: f64,

    /// Lots currently held
    pub current_lots: i64,

    /// Current market value of the holding, home currency
    pub current_amount: f64,

    /// Share of the portfolio currently held, percent
    pub current_pct: f64,

    /// Target value after margin adjustment, home currency
    pub desired_amount: f64,

    /// Target share of the portfolio, percent
    pub desired_pct: f64,

    /// Signed lot delta: positive buys, negative sells. Fractional until
    /// the order plan floors it; may be NaN when the lot price is unknown.
    pub to_buy_lots: f64,

    /// Whether funding the desired amount requires margin
    pub is_margin: bool,
}
