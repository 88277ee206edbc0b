//! Market data: per-iteration instrument context, market-cap resolution
//! with tiered fallback, FX conversion, and the AUM scrape.

mod aum;
mod context;
mod resolver;

pub use aum::AumProvider;
pub use context::MarketContext;
pub use resolver::MarketCapResolver;
