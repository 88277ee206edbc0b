//! Broker transport: the `Broker` trait and its REST implementation.

mod client;
#[cfg(test)]
pub mod mock;
mod types;

pub use client::RestBroker;
pub use types::{MoneyValue, Quotation};

use anyhow::Result;

use crate::models::{Instrument, OrderDirection};

/// Exchange trading status for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingStatus {
    Open,
    Closed,
}

/// One row of the broker's portfolio report, cash included.
#[derive(Debug, Clone)]
pub struct Holding {
    pub figi: String,
    pub instrument_uid: String,
    /// Broker-reported kind: "etf", "share", "currency", ...
    pub instrument_type: String,
    /// Quantity in units (shares, or currency amount for cash rows)
    pub quantity: f64,
    /// Quantity in whole lots
    pub quantity_lots: i64,
    /// Current price per unit in the instrument's currency
    pub current_price: f64,
}

impl Holding {
    pub fn amount(&self) -> f64 {
        if self.is_cash() {
            self.quantity
        } else {
            self.quantity * self.current_price
        }
    }

    pub fn is_cash(&self) -> bool {
        self.instrument_type == "currency"
    }
}

/// Result of a submitted order.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub status: String,
    pub lots_requested: i64,
    pub lots_executed: i64,
}

/// Broker API surface the rebalancer needs. Implemented by [`RestBroker`]
/// for production and by a mock in tests.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// All ETFs the broker lists.
    async fn list_etfs(&self) -> Result<Vec<Instrument>>;

    /// All currency instruments (used for FX rate lookups).
    async fn list_currencies(&self) -> Result<Vec<Instrument>>;

    /// Last trade price for an instrument, `None` when the broker has none.
    async fn last_price(&self, uid: &str) -> Result<Option<f64>>;

    /// Outstanding shares via the instrument-by-uid lookup (fallback tier 2).
    async fn etf_num_shares(&self, uid: &str) -> Result<Option<f64>>;

    /// Outstanding shares via asset metadata (fallback tier 3).
    async fn asset_num_shares(&self, asset_uid: &str) -> Result<Option<f64>>;

    /// Current holdings for an account, cash rows included.
    async fn portfolio(&self, account_id: &str) -> Result<Vec<Holding>>;

    /// Whether the instrument's exchange currently accepts orders.
    async fn trading_status(&self, uid: &str) -> Result<TradingStatus>;

    /// Submit a market order. `order_id` is the caller's idempotency key.
    async fn post_order(
        &self,
        account_id: &str,
        figi: &str,
        lots: u64,
        direction: OrderDirection,
        order_id: &str,
    ) -> Result<OrderResult>;
}
