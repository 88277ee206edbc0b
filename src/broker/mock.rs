//! In-memory broker used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::models::{Instrument, OrderDirection};

use super::{Broker, Holding, OrderResult, TradingStatus};

/// One submitted order as recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOrder {
    pub figi: String,
    pub direction: OrderDirection,
    pub lots: u64,
}

/// Scriptable broker: fixed listings, prices and portfolio, plus an order
/// log the tests assert against.
#[derive(Default)]
pub struct MockBroker {
    pub etfs: Vec<Instrument>,
    pub currencies: Vec<Instrument>,
    /// uid -> last price
    pub prices: HashMap<String, f64>,
    /// uid -> shares for the EtfBy tier
    pub etf_shares: HashMap<String, f64>,
    /// asset uid -> shares for the asset tier
    pub asset_shares: HashMap<String, f64>,
    pub holdings: Vec<Holding>,
    pub exchange_open: bool,
    /// Simulate a transport failure on the status check
    pub status_check_fails: bool,
    /// FIGIs whose orders the broker rejects
    pub rejected_figis: HashSet<String>,
    pub orders: Mutex<Vec<RecordedOrder>>,
}

impl MockBroker {
    pub fn submitted(&self) -> Vec<RecordedOrder> {
        self.orders.lock().unwrap().clone()
    }

    /// Convenience ETF constructor for tests.
    pub fn etf(ticker: &str, lot: u64, num_shares: Option<f64>) -> Instrument {
        Instrument {
            ticker: ticker.to_string(),
            figi: format!("FIGI-{ticker}"),
            uid: format!("uid-{ticker}"),
            asset_uid: Some(format!("asset-{ticker}")),
            lot,
            currency: "rub".to_string(),
            iso_currency: None,
            num_shares,
        }
    }
}

impl Broker for MockBroker {
    async fn list_etfs(&self) -> Result<Vec<Instrument>> {
        Ok(self.etfs.clone())
    }

    async fn list_currencies(&self) -> Result<Vec<Instrument>> {
        Ok(self.currencies.clone())
    }

    async fn last_price(&self, uid: &str) -> Result<Option<f64>> {
        Ok(self.prices.get(uid).copied())
    }

    async fn etf_num_shares(&self, uid: &str) -> Result<Option<f64>> {
        Ok(self.etf_shares.get(uid).copied())
    }

    async fn asset_num_shares(&self, asset_uid: &str) -> Result<Option<f64>> {
        Ok(self.asset_shares.get(asset_uid).copied())
    }

    async fn portfolio(&self, _account_id: &str) -> Result<Vec<Holding>> {
        Ok(self.holdings.clone())
    }

    async fn trading_status(&self, _uid: &str) -> Result<TradingStatus> {
        if self.status_check_fails {
            bail!("status check transport error");
        }
        Ok(if self.exchange_open {
            TradingStatus::Open
        } else {
            TradingStatus::Closed
        })
    }

    async fn post_order(
        &self,
        _account_id: &str,
        figi: &str,
        lots: u64,
        direction: OrderDirection,
        order_id: &str,
    ) -> Result<OrderResult> {
        if self.rejected_figis.contains(figi) {
            bail!("order rejected by broker");
        }

        self.orders.lock().unwrap().push(RecordedOrder {
            figi: figi.to_string(),
            direction,
            lots,
        });

        Ok(OrderResult {
            order_id: order_id.to_string(),
            status: "EXECUTION_REPORT_STATUS_FILL".to_string(),
            lots_requested: lots as i64,
            lots_executed: lots as i64,
        })
    }
}
