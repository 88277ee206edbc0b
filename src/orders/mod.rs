//! Order planning and phased, paced execution.

mod plan;
mod sequencer;

pub use plan::build_orders;
pub use sequencer::{
    is_exchange_open_now, ExchangeClosureBehavior, ExchangeClosureMode, OrderSequencer,
};
