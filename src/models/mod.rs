//! Domain models: instruments, desired wallet, market cap, positions, orders.

mod instrument;
mod marketcap;
mod order;
mod position;
mod wallet;

pub use instrument::{canonical_ticker, Instrument};
pub use marketcap::{AumInfo, MarketCapInfo, NumSharesSource};
pub use order::{OrderDirection, OrderIntent};
pub use position::Position;
pub use wallet::{check_weight_sum, is_home_cash, DesiredWallet, HOME_CURRENCY};
