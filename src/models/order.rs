//! Order intents derived from positions.

use serde::{Deserialize, Serialize};

use super::{is_home_cash, Position};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Buy,
    Sell,
}

/// A validated, ready-to-submit order for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub ticker: String,
    pub figi: String,
    pub direction: OrderDirection,
    /// Whole lots, always >= 1
    pub lots: u64,
    /// Whether the source position is funded on margin
    pub is_margin: bool,
}

impl OrderIntent {
    /// Derive an intent from a position, or `None` when no order is due.
    ///
    /// Skips the home-currency cash row, non-finite deltas, deltas below a
    /// whole lot, and positions without a resolved figi. Lots are floored
    /// toward zero: fractional remainders are forfeited for this iteration,
    /// never rounded up.
    pub fn from_position(position: &Position) -> Option<Self> {
        if is_home_cash(&position.ticker) {
            return None;
        }
        if !position.to_buy_lots.is_finite() {
            return None;
        }
        let lots = position.to_buy_lots.abs().floor();
        if lots < 1.0 {
            return None;
        }
        let figi = position.figi.clone()?;

        let direction = if position.to_buy_lots >= 1.0 {
            OrderDirection::Buy
        } else {
            OrderDirection::Sell
        };

        Some(Self {
            ticker: position.ticker.clone(),
            figi,
            direction,
            lots: lots as u64,
            is_margin: position.is_margin,
        })
    }
}
